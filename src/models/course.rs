//! Course Model
//!
//! Marketplace courses authored by teachers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::SortDirection;
use crate::utils::{
    error::AppError,
    validation::{language_validator, title_validator},
};

/// CEFR proficiency band a course targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proficiency {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl Proficiency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proficiency::A1 => "a1",
            Proficiency::A2 => "a2",
            Proficiency::B1 => "b1",
            Proficiency::B2 => "b2",
            Proficiency::C1 => "c1",
            Proficiency::C2 => "c2",
        }
    }
}

impl std::fmt::Display for Proficiency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl std::str::FromStr for Proficiency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "a1" => Ok(Proficiency::A1),
            "a2" => Ok(Proficiency::A2),
            "b1" => Ok(Proficiency::B1),
            "b2" => Ok(Proficiency::B2),
            "c1" => Ok(Proficiency::C1),
            "c2" => Ok(Proficiency::C2),
            _ => Err(format!("Unknown proficiency level: {}", s)),
        }
    }
}

/// Publication state of a course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Published => "published",
            CourseStatus::Archived => "archived",
        }
    }

    /// Whether learners can buy the course in this state
    pub fn is_purchasable(&self) -> bool {
        matches!(self, CourseStatus::Published)
    }
}

impl std::fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CourseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(CourseStatus::Draft),
            "published" => Ok(CourseStatus::Published),
            "archived" => Ok(CourseStatus::Archived),
            _ => Err(format!("Unknown course status: {}", s)),
        }
    }
}

/// A course listed on the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub title: String,
    pub description: String,
    /// Language taught, as a tag like `en` or `zh-CN`
    pub language: String,
    pub proficiency: Proficiency,
    /// Price in the platform currency's smallest unit
    pub price: i64,
    pub status: CourseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Course {
    pub fn is_free(&self) -> bool {
        self.price == 0
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CourseRow {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub title: String,
    pub description: String,
    pub language: String,
    pub proficiency: String,
    pub price: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TryFrom<CourseRow> for Course {
    type Error = AppError;

    fn try_from(row: CourseRow) -> Result<Self, Self::Error> {
        Ok(Course {
            id: row.id,
            teacher_id: row.teacher_id,
            title: row.title,
            description: row.description,
            language: row.language,
            proficiency: row.proficiency.parse().map_err(AppError::Internal)?,
            price: row.price,
            status: row.status.parse().map_err(AppError::Internal)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            published_at: row.published_at,
        })
    }
}

/// Request payload for creating a draft course
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(custom(function = "title_validator"))]
    pub title: String,

    #[validate(length(max = 10000, message = "Description is too long"))]
    pub description: String,

    #[validate(custom(function = "language_validator"))]
    pub language: String,

    pub proficiency: Proficiency,

    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price: i64,
}

/// Partial update of a course; `None` keeps the current value
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateCourseRequest {
    #[validate(custom(function = "title_validator"))]
    pub title: Option<String>,

    #[validate(length(max = 10000, message = "Description is too long"))]
    pub description: Option<String>,

    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price: Option<i64>,
}

/// Marketplace search filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseFilter {
    pub language: Option<String>,
    pub proficiency: Option<Proficiency>,
    pub teacher_id: Option<Uuid>,
    pub status: Option<CourseStatus>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    /// Matches title or description
    pub search: Option<String>,
}

/// Sort orders for course listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseSort {
    #[default]
    Newest,
    PriceLowToHigh,
    PriceHighToLow,
    Title,
}

impl CourseSort {
    pub(crate) fn column_and_direction(&self) -> (&'static str, SortDirection) {
        match self {
            CourseSort::Newest => ("created_at", SortDirection::Desc),
            CourseSort::PriceLowToHigh => ("price", SortDirection::Asc),
            CourseSort::PriceHighToLow => ("price", SortDirection::Desc),
            CourseSort::Title => ("title", SortDirection::Asc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proficiency_parsing_is_case_insensitive() {
        assert_eq!("B2".parse::<Proficiency>().unwrap(), Proficiency::B2);
        assert_eq!("c1".parse::<Proficiency>().unwrap(), Proficiency::C1);
        assert!("d1".parse::<Proficiency>().is_err());
        assert_eq!(Proficiency::A2.to_string(), "A2");
        assert!(Proficiency::A1 < Proficiency::C2);
    }

    #[test]
    fn test_only_published_is_purchasable() {
        assert!(CourseStatus::Published.is_purchasable());
        assert!(!CourseStatus::Draft.is_purchasable());
        assert!(!CourseStatus::Archived.is_purchasable());
    }

    #[test]
    fn test_create_request_validation() {
        let mut request = CreateCourseRequest {
            title: "Everyday Spanish".to_string(),
            description: "Conversation practice".to_string(),
            language: "es".to_string(),
            proficiency: Proficiency::A2,
            price: 199_000,
        };
        assert!(request.validate().is_ok());

        request.price = -1;
        request.language = "Spanish".to_string();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("price"));
        assert!(errors.field_errors().contains_key("language"));
    }

    #[test]
    fn test_update_request_validation_skips_none() {
        assert!(UpdateCourseRequest::default().validate().is_ok());

        let request = UpdateCourseRequest {
            title: Some("ab".to_string()),
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let request = UpdateCourseRequest {
            title: Some("     ".to_string()),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_blank_title_is_rejected() {
        let mut request = CreateCourseRequest {
            title: "    ".to_string(),
            description: String::new(),
            language: "es".to_string(),
            proficiency: Proficiency::A1,
            price: 0,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("title"));

        request.title = "  ab \t".to_string();
        assert!(request.validate().is_err());

        request.title = "  Spanish  ".to_string();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_sort_columns() {
        assert_eq!(
            CourseSort::default().column_and_direction(),
            ("created_at", SortDirection::Desc)
        );
        assert_eq!(
            CourseSort::PriceLowToHigh.column_and_direction(),
            ("price", SortDirection::Asc)
        );
    }
}
