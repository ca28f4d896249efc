//! Gamification Model
//!
//! XP, levels, daily goals and streaks.
//!
//! Levels follow a triangular curve: reaching level `n` takes
//! `100 * n * (n + 1) / 2` XP in total, so level 1 needs 100 XP, level 2
//! needs 300, level 3 needs 600 and so on.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::{error::AppError, time::days_between};

/// XP per unit of the triangular level curve
pub const XP_PER_LEVEL_UNIT: i64 = 100;

/// Largest single XP award accepted
pub const MAX_XP_AWARD: i32 = 10_000;

/// Total XP needed to reach `level`, saturating at `i64::MAX`
pub fn xp_threshold_for_level(level: i32) -> i64 {
    checked_threshold(level).unwrap_or(i64::MAX)
}

fn checked_threshold(level: i32) -> Option<i64> {
    if level <= 0 {
        return Some(0);
    }
    let n = i64::from(level);
    n.checked_mul(n + 1)
        .map(|twice_units| twice_units / 2)
        .and_then(|units| units.checked_mul(XP_PER_LEVEL_UNIT))
}

/// Level reached with `total_xp`:
/// `floor((-1 + sqrt(1 + 8 * total_xp / 100)) / 2)`.
///
/// The float estimate is corrected against the exact integer thresholds, so
/// an XP total sitting exactly on a boundary always lands on the higher level.
pub fn level_for_xp(total_xp: i64) -> i32 {
    if total_xp <= 0 {
        return 0;
    }

    let units = total_xp as f64 / XP_PER_LEVEL_UNIT as f64;
    let estimate = ((-1.0 + (1.0 + 8.0 * units).sqrt()) / 2.0).floor();
    let mut level = if estimate.is_finite() && estimate > 0.0 {
        estimate.min(f64::from(i32::MAX - 1)) as i32
    } else {
        0
    };

    while matches!(checked_threshold(level + 1), Some(next) if next <= total_xp) {
        level += 1;
    }
    while level > 0 && checked_threshold(level).map_or(true, |t| t > total_xp) {
        level -= 1;
    }

    level
}

/// Where a learner stands between two levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub level: i32,
    pub total_xp: i64,
    /// Total XP at which the current level started
    pub current_level_xp: i64,
    /// Total XP at which the next level starts
    pub next_level_xp: i64,
    pub xp_into_level: i64,
    pub xp_to_next_level: i64,
    /// Whole percent of the way to the next level (0-99)
    pub percent: u8,
}

impl LevelProgress {
    pub fn for_xp(total_xp: i64) -> Self {
        let total_xp = total_xp.max(0);
        let level = level_for_xp(total_xp);
        let current_level_xp = xp_threshold_for_level(level);
        let next_level_xp = xp_threshold_for_level(level + 1);
        let span = (next_level_xp - current_level_xp).max(1);
        let xp_into_level = total_xp - current_level_xp;

        Self {
            level,
            total_xp,
            current_level_xp,
            next_level_xp,
            xp_into_level,
            xp_to_next_level: next_level_xp - total_xp,
            percent: (xp_into_level.saturating_mul(100) / span).clamp(0, 99) as u8,
        }
    }
}

/// XP for a pronunciation assessment scored 0-100: 10 XP for taking part
/// plus one per full 10 points.
pub fn voice_assessment_xp(score: f64) -> i32 {
    let score = if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    };
    10 + (score / 10.0).floor() as i32
}

/// Activity that earned XP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpSource {
    LessonCompleted,
    QuizPassed,
    VoiceAssessment,
    DailyLogin,
    CourseCompleted,
    /// Granted by an admin; always carries an explicit amount
    Manual,
}

impl XpSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            XpSource::LessonCompleted => "lesson_completed",
            XpSource::QuizPassed => "quiz_passed",
            XpSource::VoiceAssessment => "voice_assessment",
            XpSource::DailyLogin => "daily_login",
            XpSource::CourseCompleted => "course_completed",
            XpSource::Manual => "manual",
        }
    }

    /// XP awarded when the caller gives no explicit amount
    pub fn default_amount(&self) -> Option<i32> {
        match self {
            XpSource::LessonCompleted => Some(20),
            XpSource::QuizPassed => Some(15),
            XpSource::VoiceAssessment => Some(10),
            XpSource::DailyLogin => Some(5),
            XpSource::CourseCompleted => Some(100),
            XpSource::Manual => None,
        }
    }
}

impl std::fmt::Display for XpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for XpSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lesson_completed" => Ok(XpSource::LessonCompleted),
            "quiz_passed" => Ok(XpSource::QuizPassed),
            "voice_assessment" => Ok(XpSource::VoiceAssessment),
            "daily_login" => Ok(XpSource::DailyLogin),
            "course_completed" => Ok(XpSource::CourseCompleted),
            "manual" => Ok(XpSource::Manual),
            _ => Err(format!("Unknown XP source: {}", s)),
        }
    }
}

/// Gamification profile of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserGamification {
    pub user_id: Uuid,
    pub total_xp: i64,
    pub level: i32,
    /// XP earned since the last daily reset
    pub today_xp: i32,
    pub daily_goal: i32,
    /// Consecutive local days on which the daily goal was met
    pub current_streak: i32,
    pub longest_streak: i32,
    /// Local date the daily counters were last reset on
    pub last_reset_date: NaiveDate,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of checking the daily reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DailyResetOutcome {
    /// Still the same local day
    NotDue,
    Reset {
        days_elapsed: i64,
        /// The day before `today` met the daily goal
        goal_met: bool,
        streak: i32,
    },
}

impl DailyResetOutcome {
    pub fn was_reset(&self) -> bool {
        matches!(self, DailyResetOutcome::Reset { .. })
    }
}

impl UserGamification {
    /// Fresh profile starting on `today`
    pub fn new(user_id: Uuid, daily_goal: i32, today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_xp: 0,
            level: 0,
            today_xp: 0,
            daily_goal,
            current_streak: 0,
            longest_streak: 0,
            last_reset_date: today,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn goal_met_today(&self) -> bool {
        self.today_xp >= self.daily_goal
    }

    pub fn progress(&self) -> LevelProgress {
        LevelProgress::for_xp(self.total_xp)
    }

    /// Rolls the daily counters over if `today` is a later local day than the
    /// last reset. The streak grows when the previous day met the goal and
    /// was the day right before `today`; any gap means at least one day with
    /// no XP, which breaks the streak.
    pub fn apply_daily_reset(&mut self, today: NaiveDate) -> DailyResetOutcome {
        let days_elapsed = days_between(self.last_reset_date, today);
        if days_elapsed <= 0 {
            return DailyResetOutcome::NotDue;
        }

        let goal_met = days_elapsed == 1 && self.goal_met_today();
        if goal_met {
            self.current_streak = self.current_streak.saturating_add(1);
        } else {
            self.current_streak = 0;
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.today_xp = 0;
        self.last_reset_date = today;

        DailyResetOutcome::Reset {
            days_elapsed,
            goal_met,
            streak: self.current_streak,
        }
    }

    /// Adds XP and recomputes the level; returns the level before the award
    pub fn add_xp(&mut self, amount: i32, now: DateTime<Utc>) -> i32 {
        let previous_level = self.level;
        self.total_xp = self.total_xp.saturating_add(i64::from(amount.max(0)));
        self.today_xp = self.today_xp.saturating_add(amount.max(0));
        self.level = level_for_xp(self.total_xp);
        self.last_activity_at = Some(now);
        previous_level
    }
}

/// Result of an XP award
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct XpAward {
    pub profile: UserGamification,
    pub source: XpSource,
    pub awarded: i32,
    pub previous_level: i32,
    pub leveled_up: bool,
    pub reset: DailyResetOutcome,
}

/// One XP award in a user's history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct XpEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: XpSource,
    pub amount: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct XpEventRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: String,
    pub amount: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<XpEventRow> for XpEvent {
    type Error = AppError;

    fn try_from(row: XpEventRow) -> Result<Self, Self::Error> {
        Ok(XpEvent {
            id: row.id,
            user_id: row.user_id,
            source: row.source.parse().map_err(AppError::Internal)?,
            amount: row.amount,
            created_at: row.created_at,
        })
    }
}

/// Leaderboard row as read from the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct LeaderboardRow {
    pub user_id: Uuid,
    pub name: String,
    pub total_xp: i64,
    pub level: i32,
    pub current_streak: i32,
}

/// Ranked leaderboard entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based position across all pages
    pub rank: i64,
    pub user_id: Uuid,
    pub name: String,
    pub total_xp: i64,
    pub level: i32,
    pub current_streak: i32,
}
