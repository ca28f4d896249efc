//! Gamification Service Implementation
//!
//! XP awards, daily goals, streaks and the leaderboard. Every write locks the
//! profile row and applies any pending daily reset before touching counters,
//! so a learner's first activity of the day always rolls yesterday over first.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::config::GamificationConfig;
use crate::database::{ListQuery, Page, PageRequest, SortDirection};
use crate::models::gamification::{
    voice_assessment_xp, LeaderboardEntry, LeaderboardRow, LevelProgress, UserGamification,
    XpAward, XpEvent, XpEventRow, XpSource, MAX_XP_AWARD,
};
use crate::utils::{error::AppError, time::local_date};

const PROFILE_COLUMNS: &str = "user_id, total_xp, level, today_xp, daily_goal, current_streak, \
     longest_streak, last_reset_date, last_activity_at, created_at, updated_at";

/// Profiles rolled over per transaction by the batch reset
const RESET_BATCH_SIZE: i64 = 500;

/// Gamification errors
#[derive(Error, Debug)]
pub enum GamificationError {
    #[error("User not found")]
    UserNotFound,

    #[error("XP amount must be between 1 and {max}, got {amount}")]
    InvalidXpAmount { amount: i32, max: i32 },

    /// Sources without a default amount need an explicit one
    #[error("XP source {0} requires an explicit amount")]
    MissingAmount(XpSource),

    #[error("Daily goal must be between 1 and {max}, got {goal}")]
    InvalidDailyGoal { goal: i32, max: i32 },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<GamificationError> for AppError {
    fn from(err: GamificationError) -> Self {
        match err {
            GamificationError::UserNotFound => AppError::NotFound(err.to_string()),
            GamificationError::InvalidXpAmount { .. }
            | GamificationError::MissingAmount(_)
            | GamificationError::InvalidDailyGoal { .. } => AppError::Validation(err.to_string()),
            GamificationError::DatabaseError(e) => AppError::Database(e),
            GamificationError::App(e) => e,
        }
    }
}

pub type GamificationServiceResult<T> = Result<T, GamificationError>;

/// Resolves the XP to grant for `source`, falling back to its default
pub fn resolve_award_amount(
    source: XpSource,
    amount: Option<i32>,
) -> GamificationServiceResult<i32> {
    let amount = amount
        .or_else(|| source.default_amount())
        .ok_or(GamificationError::MissingAmount(source))?;

    if !(1..=MAX_XP_AWARD).contains(&amount) {
        return Err(GamificationError::InvalidXpAmount {
            amount,
            max: MAX_XP_AWARD,
        });
    }

    Ok(amount)
}

/// Locks the profile, creating it on first use
async fn lock_or_create_profile(
    conn: &mut PgConnection,
    user_id: Uuid,
    default_goal: i32,
    today: NaiveDate,
) -> GamificationServiceResult<UserGamification> {
    sqlx::query(
        r#"
        INSERT INTO user_gamification (user_id, daily_goal, last_reset_date)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(default_goal)
    .bind(today)
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            GamificationError::UserNotFound
        }
        other => GamificationError::DatabaseError(other),
    })?;

    let profile = sqlx::query_as::<_, UserGamification>(&format!(
        "SELECT {} FROM user_gamification WHERE user_id = $1 FOR UPDATE",
        PROFILE_COLUMNS
    ))
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(profile)
}

async fn save_profile(
    conn: &mut PgConnection,
    profile: &UserGamification,
) -> GamificationServiceResult<UserGamification> {
    let saved = sqlx::query_as::<_, UserGamification>(&format!(
        r#"
        UPDATE user_gamification
        SET total_xp = $2,
            level = $3,
            today_xp = $4,
            daily_goal = $5,
            current_streak = $6,
            longest_streak = $7,
            last_reset_date = $8,
            last_activity_at = $9,
            updated_at = NOW()
        WHERE user_id = $1
        RETURNING {}
        "#,
        PROFILE_COLUMNS
    ))
    .bind(profile.user_id)
    .bind(profile.total_xp)
    .bind(profile.level)
    .bind(profile.today_xp)
    .bind(profile.daily_goal)
    .bind(profile.current_streak)
    .bind(profile.longest_streak)
    .bind(profile.last_reset_date)
    .bind(profile.last_activity_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(saved)
}

#[derive(Clone)]
pub struct GamificationService {
    db_pool: PgPool,
    config: GamificationConfig,
}

impl GamificationService {
    pub fn new(db_pool: PgPool, config: GamificationConfig) -> Self {
        Self { db_pool, config }
    }

    /// Local calendar date of `now` in the platform timezone
    fn today(&self, now: DateTime<Utc>) -> GamificationServiceResult<NaiveDate> {
        Ok(local_date(now, self.config.offset()?))
    }

    /// Returns the user's profile, creating it and applying any due daily reset
    pub async fn get_or_create_profile(
        &self,
        user_id: Uuid,
    ) -> GamificationServiceResult<UserGamification> {
        let today = self.today(Utc::now())?;

        let mut tx = self.db_pool.begin().await?;
        let mut profile =
            lock_or_create_profile(&mut *tx, user_id, self.config.default_daily_goal, today)
                .await?;

        if profile.apply_daily_reset(today).was_reset() {
            profile = save_profile(&mut *tx, &profile).await?;
        }
        tx.commit().await?;

        Ok(profile)
    }

    pub async fn level_progress(&self, user_id: Uuid) -> GamificationServiceResult<LevelProgress> {
        Ok(self.get_or_create_profile(user_id).await?.progress())
    }

    /// Grants XP for an activity. `amount` overrides the source's default.
    pub async fn award_xp(
        &self,
        user_id: Uuid,
        source: XpSource,
        amount: Option<i32>,
    ) -> GamificationServiceResult<XpAward> {
        let amount = resolve_award_amount(source, amount)?;
        let now = Utc::now();
        let today = self.today(now)?;

        let mut tx = self.db_pool.begin().await?;
        let mut profile =
            lock_or_create_profile(&mut *tx, user_id, self.config.default_daily_goal, today)
                .await?;

        let streak_before = profile.current_streak;
        let reset = profile.apply_daily_reset(today);
        if reset.was_reset() && streak_before > 0 && profile.current_streak == 0 {
            log::info!("User {} lost a {}-day streak", user_id, streak_before);
        }

        let previous_level = profile.add_xp(amount, now);
        let profile = save_profile(&mut *tx, &profile).await?;

        sqlx::query("INSERT INTO xp_events (user_id, source, amount) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(source.as_str())
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let leveled_up = profile.level > previous_level;
        if leveled_up {
            log::info!(
                "User {} reached level {} ({} XP)",
                user_id,
                profile.level,
                profile.total_xp
            );
        } else {
            log::debug!("User {} earned {} XP from {}", user_id, amount, source);
        }

        Ok(XpAward {
            profile,
            source,
            awarded: amount,
            previous_level,
            leveled_up,
            reset,
        })
    }

    /// Grants XP for a pronunciation assessment scored 0-100
    pub async fn award_voice_assessment(
        &self,
        user_id: Uuid,
        score: f64,
    ) -> GamificationServiceResult<XpAward> {
        self.award_xp(
            user_id,
            XpSource::VoiceAssessment,
            Some(voice_assessment_xp(score)),
        )
        .await
    }

    pub async fn set_daily_goal(
        &self,
        user_id: Uuid,
        goal: i32,
    ) -> GamificationServiceResult<UserGamification> {
        if goal <= 0 || goal > self.config.max_daily_goal {
            return Err(GamificationError::InvalidDailyGoal {
                goal,
                max: self.config.max_daily_goal,
            });
        }

        let today = self.today(Utc::now())?;

        let mut tx = self.db_pool.begin().await?;
        let mut profile =
            lock_or_create_profile(&mut *tx, user_id, self.config.default_daily_goal, today)
                .await?;

        profile.apply_daily_reset(today);
        profile.daily_goal = goal;
        let profile = save_profile(&mut *tx, &profile).await?;
        tx.commit().await?;

        Ok(profile)
    }

    /// Rolls over every profile whose last reset is before today. Returns the
    /// number of profiles reset.
    pub async fn run_daily_reset_all(&self) -> GamificationServiceResult<u64> {
        let today = self.today(Utc::now())?;
        let mut total = 0u64;

        loop {
            let mut tx = self.db_pool.begin().await?;

            // Rows locked by an in-flight award are skipped; that award resets them itself
            let batch = sqlx::query_as::<_, UserGamification>(&format!(
                r#"
                SELECT {} FROM user_gamification
                WHERE last_reset_date < $1
                ORDER BY user_id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
                "#,
                PROFILE_COLUMNS
            ))
            .bind(today)
            .bind(RESET_BATCH_SIZE)
            .fetch_all(&mut *tx)
            .await?;

            let fetched = batch.len() as i64;
            for mut profile in batch {
                if profile.apply_daily_reset(today).was_reset() {
                    save_profile(&mut *tx, &profile).await?;
                    total += 1;
                }
            }
            tx.commit().await?;

            if fetched < RESET_BATCH_SIZE {
                break;
            }
        }

        log::info!("Daily reset for {} rolled over {} profiles", today, total);
        Ok(total)
    }

    /// Users ranked by total XP
    pub async fn leaderboard(
        &self,
        page: PageRequest,
    ) -> GamificationServiceResult<Page<LeaderboardEntry>> {
        let rows = ListQuery::new(
            "SELECT g.user_id, u.name, g.total_xp, g.level, g.current_streak \
             FROM user_gamification g JOIN users u ON u.id = g.user_id",
            "SELECT COUNT(*) FROM user_gamification g",
        )
        .tiebreak("g.user_id")
        .order_by("g.total_xp", SortDirection::Desc)
        .fetch_page::<LeaderboardRow>(&self.db_pool, page)
        .await?;

        Ok(rank_entries(rows, page))
    }

    /// A user's XP awards, newest first
    pub async fn xp_history(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> GamificationServiceResult<Page<XpEvent>> {
        let page = ListQuery::new(
            "SELECT id, user_id, source, amount, created_at FROM xp_events",
            "SELECT COUNT(*) FROM xp_events",
        )
        .eq("user_id", user_id)
        .order_by("created_at", SortDirection::Desc)
        .fetch_page::<XpEventRow>(&self.db_pool, page)
        .await?
        .try_map(XpEvent::try_from)?;

        Ok(page)
    }
}

/// Numbers leaderboard rows with their position across all pages
fn rank_entries(rows: Page<LeaderboardRow>, page: PageRequest) -> Page<LeaderboardEntry> {
    let mut rank = page.offset();
    rows.map(|row| {
        rank += 1;
        LeaderboardEntry {
            rank,
            user_id: row.user_id,
            name: row.name,
            total_xp: row.total_xp,
            level: row.level,
            current_streak: row.current_streak,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gamification::DailyResetOutcome;
    use crate::models::user::UserRole;
    use crate::service::test_support::{gamification_config, insert_user};
    use chrono::Duration;

    #[test]
    fn test_award_amount_defaults_by_source() {
        assert_eq!(
            resolve_award_amount(XpSource::LessonCompleted, None).unwrap(),
            20
        );
        assert_eq!(
            resolve_award_amount(XpSource::LessonCompleted, Some(35)).unwrap(),
            35
        );
        assert!(matches!(
            resolve_award_amount(XpSource::Manual, None),
            Err(GamificationError::MissingAmount(XpSource::Manual))
        ));
    }

    #[test]
    fn test_award_amount_bounds() {
        assert!(resolve_award_amount(XpSource::Manual, Some(1)).is_ok());
        assert!(resolve_award_amount(XpSource::Manual, Some(MAX_XP_AWARD)).is_ok());
        assert!(resolve_award_amount(XpSource::Manual, Some(0)).is_err());
        assert!(resolve_award_amount(XpSource::QuizPassed, Some(-5)).is_err());
        assert!(resolve_award_amount(XpSource::Manual, Some(MAX_XP_AWARD + 1)).is_err());
    }

    #[test]
    fn test_ranks_continue_across_pages() {
        let row = |name: &str, xp: i64| LeaderboardRow {
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            total_xp: xp,
            level: 0,
            current_streak: 0,
        };
        let request = PageRequest::new(3, 2);
        let page = Page::new(vec![row("an", 900), row("binh", 850)], 10, request);

        let ranked = rank_entries(page, request);
        let ranks: Vec<i64> = ranked.items.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![5, 6]);
        assert_eq!(ranked.total_count, 10);
        assert_eq!(ranked.items[1].name, "binh");
    }

    #[test]
    fn test_error_mapping() {
        let err: AppError = GamificationError::InvalidDailyGoal { goal: 0, max: 1000 }.into();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(
            AppError::from(GamificationError::UserNotFound).error_code(),
            "NOT_FOUND"
        );
    }

    fn utc_today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Moves a profile back in time as if its last reset happened `days_ago`
    async fn rewind_profile(pool: &PgPool, user_id: Uuid, days_ago: i64, today_xp: i32) {
        sqlx::query(
            "UPDATE user_gamification SET last_reset_date = $2, today_xp = $3 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(utc_today() - Duration::days(days_ago))
        .bind(today_xp)
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_award_creates_profile_and_levels_up(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());
        let user = insert_user(&pool, "Minh", UserRole::Learner).await;

        let first = service
            .award_xp(user.id, XpSource::Manual, Some(60))
            .await
            .unwrap();
        assert_eq!(first.profile.total_xp, 60);
        assert_eq!(first.profile.level, 0);
        assert!(!first.leveled_up);
        assert_eq!(first.reset, DailyResetOutcome::NotDue);

        let second = service
            .award_xp(user.id, XpSource::Manual, Some(40))
            .await
            .unwrap();
        assert_eq!(second.profile.total_xp, 100);
        assert_eq!(second.profile.level, 1);
        assert_eq!(second.previous_level, 0);
        assert!(second.leveled_up);
        assert_eq!(second.profile.today_xp, 100);

        let history = service
            .xp_history(user.id, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(history.total_count, 2);
        assert!(history.items.iter().all(|e| e.source == XpSource::Manual));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_unknown_user(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());

        let result = service
            .award_xp(Uuid::new_v4(), XpSource::DailyLogin, None)
            .await;
        assert!(matches!(result, Err(GamificationError::UserNotFound)));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_streak_grows_when_goal_met_yesterday(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());
        let user = insert_user(&pool, "Minh", UserRole::Learner).await;
        service.get_or_create_profile(user.id).await.unwrap();

        rewind_profile(&pool, user.id, 1, 80).await;
        let award = service
            .award_xp(user.id, XpSource::QuizPassed, None)
            .await
            .unwrap();

        assert!(matches!(
            award.reset,
            DailyResetOutcome::Reset {
                days_elapsed: 1,
                goal_met: true,
                streak: 1
            }
        ));
        assert_eq!(award.profile.current_streak, 1);
        assert_eq!(award.profile.longest_streak, 1);
        assert_eq!(award.profile.today_xp, award.awarded);
        assert_eq!(award.profile.last_reset_date, utc_today());
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_gap_breaks_streak(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());
        let user = insert_user(&pool, "Minh", UserRole::Learner).await;
        service.get_or_create_profile(user.id).await.unwrap();

        sqlx::query("UPDATE user_gamification SET current_streak = 4, longest_streak = 4 WHERE user_id = $1")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();
        rewind_profile(&pool, user.id, 3, 500).await;

        let profile = service.get_or_create_profile(user.id).await.unwrap();
        assert_eq!(profile.current_streak, 0);
        assert_eq!(profile.longest_streak, 4);
        assert_eq!(profile.today_xp, 0);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_daily_reset_all(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());
        let stale = insert_user(&pool, "An", UserRole::Learner).await;
        let current = insert_user(&pool, "Binh", UserRole::Learner).await;
        service.get_or_create_profile(stale.id).await.unwrap();
        service.get_or_create_profile(current.id).await.unwrap();

        rewind_profile(&pool, stale.id, 1, 10).await;

        assert_eq!(service.run_daily_reset_all().await.unwrap(), 1);
        assert_eq!(service.run_daily_reset_all().await.unwrap(), 0);

        let profile = service.get_or_create_profile(stale.id).await.unwrap();
        assert_eq!(profile.last_reset_date, utc_today());
        assert_eq!(profile.current_streak, 0);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_set_daily_goal(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());
        let user = insert_user(&pool, "Minh", UserRole::Learner).await;

        let profile = service.set_daily_goal(user.id, 120).await.unwrap();
        assert_eq!(profile.daily_goal, 120);

        for goal in [0, gamification_config().max_daily_goal + 1] {
            let result = service.set_daily_goal(user.id, goal).await;
            assert!(matches!(
                result,
                Err(GamificationError::InvalidDailyGoal { .. })
            ));
        }
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_leaderboard_ranks(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());
        let an = insert_user(&pool, "An", UserRole::Learner).await;
        let binh = insert_user(&pool, "Binh", UserRole::Learner).await;
        let chi = insert_user(&pool, "Chi", UserRole::Learner).await;

        service.award_xp(an.id, XpSource::Manual, Some(300)).await.unwrap();
        service.award_xp(binh.id, XpSource::Manual, Some(900)).await.unwrap();
        service.award_xp(chi.id, XpSource::Manual, Some(50)).await.unwrap();

        let first = service.leaderboard(PageRequest::new(1, 2)).await.unwrap();
        let names: Vec<&str> = first.items.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Binh", "An"]);
        assert_eq!(first.items[0].rank, 1);
        assert_eq!(first.items[0].level, 3);

        let second = service.leaderboard(PageRequest::new(2, 2)).await.unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].rank, 3);
        assert_eq!(second.items[0].user_id, chi.id);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_voice_assessment_award(pool: PgPool) {
        let service = GamificationService::new(pool.clone(), gamification_config());
        let user = insert_user(&pool, "Minh", UserRole::Learner).await;

        let award = service.award_voice_assessment(user.id, 90.0).await.unwrap();
        assert_eq!(award.source, XpSource::VoiceAssessment);
        assert_eq!(award.awarded, voice_assessment_xp(90.0));
    }
}
