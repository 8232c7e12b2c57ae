/// Referral program
///
/// Each user gets one referral code. A registration carrying that code links
/// the new user to the referrer; the first paid subscription of the referred
/// user activates the referral and credits the commission.
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_COMMISSION_PERCENT: f64 = 20.0;
const CODE_LENGTH: usize = 8;
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, Serialize)]
pub struct ReferralProgram {
    pub referral_code: String,
    pub commission_percent: f64,
    pub total_earned: f64,
    pub total_referred: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferralStats {
    pub invited: i64,
    pub active: i64,
    pub earned: f64,
    /// Payouts are not modelled, so everything earned is available
    pub available: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralFriend {
    pub date: DateTime<Utc>,
    pub email: String,
    pub status: String,
    pub bonus: f64,
}

pub fn generate_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// Hide most of the local part: `alex@example.com` -> `al***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let visible: String = local.chars().take(2).collect();
            format!("{}***@{}", visible, domain)
        }
        None => "***".to_string(),
    }
}

pub fn commission_for(amount: f64, percent: f64) -> f64 {
    if amount <= 0.0 || percent <= 0.0 {
        return 0.0;
    }
    (amount * percent / 100.0 * 100.0).round() / 100.0
}

pub struct ReferralManager {
    db: PgPool,
}

impl ReferralManager {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn get_or_create_program(&self, user_id: Uuid) -> ApiResult<ReferralProgram> {
        if let Some(program) = self.find_program(user_id).await? {
            return Ok(program);
        }

        for _ in 0..3 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO referral_programs (id, user_id, referral_code, commission_percent)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(generate_referral_code())
            .bind(DEFAULT_COMMISSION_PERCENT)
            .execute(&self.db)
            .await?;

            // Either inserted, or another request created the program first
            if let Some(program) = self.find_program(user_id).await? {
                if inserted.rows_affected() > 0 {
                    info!("Created referral program for user {}", user_id);
                }
                return Ok(program);
            }
        }

        Err(ApiError::Internal("could not allocate a referral code".to_string()))
    }

    async fn find_program(&self, user_id: Uuid) -> ApiResult<Option<ReferralProgram>> {
        let row = sqlx::query(
            r#"
            SELECT referral_code, commission_percent, total_earned, total_referred, created_at
            FROM referral_programs WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(program_from_row).transpose()
    }

    /// Link a new user to the owner of `code`; unknown codes are ignored
    pub async fn attach_referral(&self, code: &str, referred_id: Uuid) -> ApiResult<bool> {
        let code = code.trim().to_uppercase();
        let referrer: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM referral_programs WHERE referral_code = $1")
                .bind(&code)
                .fetch_optional(&self.db)
                .await?;

        let Some(referrer_id) = referrer else {
            warn!("Registration used unknown referral code {}", code);
            return Ok(false);
        };
        if referrer_id == referred_id {
            return Ok(false);
        }

        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO referrals (id, referrer_id, referred_id, status)
            VALUES ($1, $2, $3, 'pending')
            ON CONFLICT (referred_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(referrer_id)
        .bind(referred_id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() > 0 {
            sqlx::query(
                "UPDATE referral_programs SET total_referred = total_referred + 1
                 WHERE user_id = $1",
            )
            .bind(referrer_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(inserted.rows_affected() > 0)
    }

    /// Credit the referrer when a referred user pays; only the first payment counts
    pub async fn record_payment(&self, referred_id: Uuid, amount: f64) -> ApiResult<Option<f64>> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT r.id, r.referrer_id, p.commission_percent
            FROM referrals r
            JOIN referral_programs p ON p.user_id = r.referrer_id
            WHERE r.referred_id = $1 AND r.status = 'pending'
            FOR UPDATE OF r
            "#,
        )
        .bind(referred_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let referral_id: Uuid = row.try_get("id")?;
        let referrer_id: Uuid = row.try_get("referrer_id")?;
        let percent: f64 = row.try_get("commission_percent")?;
        let commission = commission_for(amount, percent);

        sqlx::query("UPDATE referrals SET status = 'active', commission = $1 WHERE id = $2")
            .bind(commission)
            .bind(referral_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE referral_programs SET total_earned = total_earned + $1 WHERE user_id = $2",
        )
        .bind(commission)
        .bind(referrer_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!("Referral {} activated, commission {:.2}", referral_id, commission);
        Ok(Some(commission))
    }

    pub async fn stats(&self, user_id: Uuid) -> ApiResult<ReferralStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::BIGINT AS invited,
                   COUNT(*) FILTER (WHERE status = 'active')::BIGINT AS active,
                   COALESCE(SUM(commission), 0)::DOUBLE PRECISION AS earned
            FROM referrals WHERE referrer_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        let earned: f64 = row.try_get("earned")?;
        Ok(ReferralStats {
            invited: row.try_get("invited")?,
            active: row.try_get("active")?,
            earned,
            available: earned,
        })
    }

    pub async fn friends(&self, user_id: Uuid) -> ApiResult<Vec<ReferralFriend>> {
        let rows = sqlx::query(
            r#"
            SELECT r.created_at, u.email, r.status, r.commission
            FROM referrals r
            JOIN users u ON u.id = r.referred_id
            WHERE r.referrer_id = $1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<ReferralFriend> {
                let email: String = row.try_get("email")?;
                Ok(ReferralFriend {
                    date: row.try_get("created_at")?,
                    email: mask_email(&email),
                    status: row.try_get("status")?,
                    bonus: row.try_get("commission")?,
                })
            })
            .collect()
    }
}

fn program_from_row(row: &PgRow) -> ApiResult<ReferralProgram> {
    Ok(ReferralProgram {
        referral_code: row.try_get("referral_code")?,
        commission_percent: row.try_get("commission_percent")?,
        total_earned: row.try_get("total_earned")?,
        total_referred: row.try_get("total_referred")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referral_code_shape() {
        let code = generate_referral_code();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.bytes().all(|b| CODE_CHARSET.contains(&b)));
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alex@example.com"), "al***@example.com");
        assert_eq!(mask_email("a@example.com"), "a***@example.com");
        assert_eq!(mask_email("garbage"), "***");
    }

    #[test]
    fn test_commission() {
        assert_eq!(commission_for(990.0, DEFAULT_COMMISSION_PERCENT), 198.0);
        assert_eq!(commission_for(0.0, DEFAULT_COMMISSION_PERCENT), 0.0);
        assert_eq!(commission_for(10.0, 0.0), 0.0);
        assert_eq!(commission_for(33.33, 20.0), 6.67);
    }
}
