use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rand::Rng;
use rust_decimal::Decimal;
use tokio_postgres::Row;

/// Characters used in anti-counterfeit codes. Look-alikes (`I`, `L`, `O`,
/// `g`, `l`, `o`, `0`, `1`, `9`) are left out.
pub const ANTI_FAKE_ALPHABET: &str = "ABCDEFGHJKMNPQRSTUVWXYZabcdefhijkmnpqrstuvwxyz2345678";

pub const ANTI_FAKE_CODE_LEN: usize = 6;

/// Draw a fresh anti-counterfeit code from `rng`.
pub fn generate_anti_fake_code<R: Rng>(rng: &mut R) -> String {
    let alphabet = ANTI_FAKE_ALPHABET.as_bytes();
    (0..ANTI_FAKE_CODE_LEN)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// A stored guarantee.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarantee {
    pub id: i32,
    pub guarantee_number: String,
    pub anti_fake_code: String,
    pub beneficiary: String,
    pub applicant: String,
    pub project_name: String,
    pub guarantee_amount: Decimal,
    pub expiry_date: NaiveDate,
    pub guarantor: String,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Guarantee {
    /// Column list matching [`Guarantee::from_row`].
    pub const COLUMNS: &'static str = "id, guarantee_number, anti_fake_code, beneficiary, applicant, \
         project_name, guarantee_amount, expiry_date, guarantor, created_at, updated_at";

    pub fn from_row(row: &Row) -> std::result::Result<Self, tokio_postgres::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            guarantee_number: row.try_get("guarantee_number")?,
            anti_fake_code: row.try_get("anti_fake_code")?,
            beneficiary: row.try_get("beneficiary")?,
            applicant: row.try_get("applicant")?,
            project_name: row.try_get("project_name")?,
            guarantee_amount: row.try_get("guarantee_amount")?,
            expiry_date: row.try_get("expiry_date")?,
            guarantor: row.try_get("guarantor")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Fields supplied when creating or updating a guarantee.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGuarantee {
    pub guarantee_number: String,
    /// Generated on create when absent. Kept as is on update when absent.
    pub anti_fake_code: Option<String>,
    pub beneficiary: String,
    pub applicant: String,
    pub project_name: String,
    pub guarantee_amount: Decimal,
    pub expiry_date: NaiveDate,
    pub guarantor: String,
}

impl NewGuarantee {
    /// Reject blank required fields and a zero amount.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("guarantee_number", &self.guarantee_number),
            ("beneficiary", &self.beneficiary),
            ("applicant", &self.applicant),
            ("project_name", &self.project_name),
            ("guarantor", &self.guarantor),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Error::MissingField(*field));
        }
        if self.guarantee_amount.is_zero() {
            return Err(Error::MissingField("guarantee_amount"));
        }
        Ok(())
    }

    /// The anti-fake code to store, if one was given.
    pub(crate) fn given_code(&self) -> Option<&str> {
        self.anti_fake_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::str::FromStr;

    fn sample() -> NewGuarantee {
        NewGuarantee {
            guarantee_number: "BH-2026-0001".into(),
            anti_fake_code: None,
            beneficiary: "City Water Authority".into(),
            applicant: "North Ridge Construction".into(),
            project_name: "Reservoir pump station".into(),
            guarantee_amount: Decimal::from_str("150000.00").unwrap(),
            expiry_date: NaiveDate::from_ymd_opt(2027, 6, 30).unwrap(),
            guarantor: "First Provincial Bank".into(),
        }
    }

    #[test]
    fn test_anti_fake_code_uses_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let code = generate_anti_fake_code(&mut rng);
            assert_eq!(code.len(), ANTI_FAKE_CODE_LEN);
            assert!(code.chars().all(|c| ANTI_FAKE_ALPHABET.contains(c)), "{code}");
        }
    }

    #[test]
    fn test_alphabet_has_no_look_alikes() {
        for c in ['I', 'L', 'O', 'g', 'l', 'o', '0', '1', '9'] {
            assert!(!ANTI_FAKE_ALPHABET.contains(c), "{c}");
        }
        assert_eq!(ANTI_FAKE_ALPHABET.len(), 53);
    }

    #[test]
    fn test_validate_accepts_complete_record() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let mut g = sample();
        g.applicant = "   ".into();
        assert!(matches!(g.validate(), Err(Error::MissingField("applicant"))));

        let mut g = sample();
        g.guarantee_amount = Decimal::ZERO;
        assert!(matches!(
            g.validate(),
            Err(Error::MissingField("guarantee_amount"))
        ));
    }

    #[test]
    fn test_given_code() {
        let mut g = sample();
        assert_eq!(g.given_code(), None);
        g.anti_fake_code = Some(" ".into());
        assert_eq!(g.given_code(), None);
        g.anti_fake_code = Some("Ab3xYz".into());
        assert_eq!(g.given_code(), Some("Ab3xYz"));
    }
}
