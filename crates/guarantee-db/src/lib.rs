//! Guarantee records with anti-counterfeit verification.
//!
//! The `guarantees` table is declared in [`schema`] and kept in shape by
//! `mend`: every connection taken from [`open_pool`] has the table created or
//! repaired before it is handed out.
//!
//! ```ignore
//! let config = mend::Config::from_env()?;
//! let pool = guarantee_db::open_pool(&config)?;
//! let conn = pool.get().await?;
//!
//! let store = GuaranteeStore::with_namespace(&conn, pool.namespace());
//! if let Some(g) = store.verify("BH-2026-0001", "Ab3xYz").await? {
//!     println!("{} issued by {}", g.guarantee_number, g.guarantor);
//! }
//! ```

mod error;
pub mod record;
pub mod schema;
mod store;

pub use error::{Error, Result};
pub use record::{Guarantee, NewGuarantee};
pub use store::{Created, GuaranteeStore};

use mend::{Config, ReconcilingPool};

/// Pool whose connections come with a reconciled `guarantees` table.
pub fn open_pool(config: &Config) -> Result<ReconcilingPool> {
    Ok(ReconcilingPool::from_config(config, schema::schema()?)?)
}

/// Mask the password in a connection URL for display.
pub fn mask_password(url: &str) -> String {
    if let Some(start) = url.find("://") {
        if let Some(at) = url.rfind('@') {
            if at > start + 3 {
                let prefix = &url[..start + 3];
                let suffix = &url[at..];
                if let Some(colon) = url[start + 3..at].find(':') {
                    let user = &url[start + 3..start + 3 + colon];
                    return format!("{}{}:***{}", prefix, user, suffix);
                }
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://app:s3cret@db:5432/guarantees"),
            "postgres://app:***@db:5432/guarantees"
        );
        assert_eq!(
            mask_password("postgres://app@db/guarantees"),
            "postgres://app@db/guarantees"
        );
        assert_eq!(mask_password("host=db user=app"), "host=db user=app");
    }
}
