//! Actor categories, examination levels, and the partition router.
//!
//! Every identity lives in exactly one physical partition. Staff categories own
//! one partition each; students are split by examination level into two
//! disjoint partitions. The router is the only place that maps a category (and
//! level) onto a partition, so every other component addresses storage through
//! the [`Partition`] it returns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of actor categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorCategory {
    Student,
    Teacher,
    Examiner,
    Admin,
}

impl ActorCategory {
    /// Stable lower-case name used in storage and audit records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
            Self::Examiner => "examiner",
            Self::Admin => "admin",
        }
    }

    /// Two-letter code embedded in generated identifiers.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Student => "ST",
            Self::Teacher => "TC",
            Self::Examiner => "EX",
            Self::Admin => "AD",
        }
    }
}

impl fmt::Display for ActorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorCategory {
    type Err = PartitionResolutionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            "examiner" => Ok(Self::Examiner),
            "admin" => Ok(Self::Admin),
            _ => Err(PartitionResolutionError::InvalidCategory {
                value: value.to_owned(),
            }),
        }
    }
}

/// Examination level that splits students across two partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamLevel {
    Ordinary,
    Advanced,
}

impl ExamLevel {
    /// Stable lower-case name used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ordinary => "ordinary",
            Self::Advanced => "advanced",
        }
    }
}

impl fmt::Display for ExamLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised while resolving a partition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionResolutionError {
    /// The category is not one of the four supported values.
    #[error("unknown actor category: {value}")]
    InvalidCategory { value: String },
    /// A student category was supplied without an exam level.
    #[error("student partitions require an exam level")]
    MissingExamLevel,
    /// An exam level was supplied for a non-student category.
    #[error("exam level is only valid for students, not {category}")]
    UnexpectedExamLevel { category: ActorCategory },
}

impl From<PartitionResolutionError> for super::Error {
    fn from(value: PartitionResolutionError) -> Self {
        Self::partition_not_found(value.to_string())
    }
}

/// Physical storage partition owning records of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    StudentOrdinary,
    StudentAdvanced,
    Teacher,
    Examiner,
    Admin,
}

impl Partition {
    /// Order in which federated lookups probe partitions.
    ///
    /// The first partition holding an email wins. Student partitions come
    /// first, ordinary before advanced, then the staff partitions. If the
    /// global email invariant were ever broken this order decides which
    /// duplicate is returned, so it must not change without a migration note.
    pub const FEDERATED_PROBE_ORDER: [Self; 5] = [
        Self::StudentOrdinary,
        Self::StudentAdvanced,
        Self::Teacher,
        Self::Examiner,
        Self::Admin,
    ];

    /// Table or collection name that stores this partition.
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::StudentOrdinary => "students_ordinary",
            Self::StudentAdvanced => "students_advanced",
            Self::Teacher => "teachers",
            Self::Examiner => "examiners",
            Self::Admin => "administrators",
        }
    }

    /// Category whose records live in this partition.
    pub const fn category(self) -> ActorCategory {
        match self {
            Self::StudentOrdinary | Self::StudentAdvanced => ActorCategory::Student,
            Self::Teacher => ActorCategory::Teacher,
            Self::Examiner => ActorCategory::Examiner,
            Self::Admin => ActorCategory::Admin,
        }
    }

    /// Exam level for student partitions.
    pub const fn exam_level(self) -> Option<ExamLevel> {
        match self {
            Self::StudentOrdinary => Some(ExamLevel::Ordinary),
            Self::StudentAdvanced => Some(ExamLevel::Advanced),
            Self::Teacher | Self::Examiner | Self::Admin => None,
        }
    }

    /// Look a partition up by its table name.
    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::FEDERATED_PROBE_ORDER
            .into_iter()
            .find(|partition| partition.table_name() == name)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Map a category (and, for students, an exam level) to its partition.
///
/// # Examples
/// ```
/// use examboard_identity::domain::{ActorCategory, ExamLevel, Partition, resolve_partition};
///
/// let partition = resolve_partition(ActorCategory::Student, Some(ExamLevel::Advanced))
///     .expect("students with a level resolve");
/// assert_eq!(partition, Partition::StudentAdvanced);
/// ```
pub fn resolve_partition(
    category: ActorCategory,
    exam_level: Option<ExamLevel>,
) -> Result<Partition, PartitionResolutionError> {
    match (category, exam_level) {
        (ActorCategory::Student, Some(ExamLevel::Ordinary)) => Ok(Partition::StudentOrdinary),
        (ActorCategory::Student, Some(ExamLevel::Advanced)) => Ok(Partition::StudentAdvanced),
        (ActorCategory::Student, None) => Err(PartitionResolutionError::MissingExamLevel),
        (_, Some(_)) => Err(PartitionResolutionError::UnexpectedExamLevel { category }),
        (ActorCategory::Teacher, None) => Ok(Partition::Teacher),
        (ActorCategory::Examiner, None) => Ok(Partition::Examiner),
        (ActorCategory::Admin, None) => Ok(Partition::Admin),
    }
}

/// Partitions owned by a category, in federated probe order.
///
/// Unlike [`resolve_partition`], a student without a level yields both
/// student partitions. The result never crosses category boundaries.
pub fn partitions_for(
    category: ActorCategory,
    exam_level: Option<ExamLevel>,
) -> Result<Vec<Partition>, PartitionResolutionError> {
    match (category, exam_level) {
        (ActorCategory::Student, None) => Ok(vec![
            Partition::StudentOrdinary,
            Partition::StudentAdvanced,
        ]),
        _ => resolve_partition(category, exam_level).map(|partition| vec![partition]),
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for partition routing.
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ActorCategory::Student, Some(ExamLevel::Ordinary), Partition::StudentOrdinary)]
    #[case(ActorCategory::Student, Some(ExamLevel::Advanced), Partition::StudentAdvanced)]
    #[case(ActorCategory::Teacher, None, Partition::Teacher)]
    #[case(ActorCategory::Examiner, None, Partition::Examiner)]
    #[case(ActorCategory::Admin, None, Partition::Admin)]
    fn resolves_valid_combinations(
        #[case] category: ActorCategory,
        #[case] level: Option<ExamLevel>,
        #[case] expected: Partition,
    ) {
        let partition = resolve_partition(category, level).expect("valid combination");
        assert_eq!(partition, expected);
        assert_eq!(partition.category(), category);
        assert_eq!(partition.exam_level(), level);
    }

    #[rstest]
    fn student_without_level_is_rejected() {
        let err = resolve_partition(ActorCategory::Student, None).expect_err("level required");
        assert_eq!(err, PartitionResolutionError::MissingExamLevel);
    }

    #[rstest]
    #[case(ActorCategory::Teacher)]
    #[case(ActorCategory::Examiner)]
    #[case(ActorCategory::Admin)]
    fn staff_with_level_is_rejected(#[case] category: ActorCategory) {
        let err = resolve_partition(category, Some(ExamLevel::Ordinary))
            .expect_err("level forbidden for staff");
        assert_eq!(err, PartitionResolutionError::UnexpectedExamLevel { category });
    }

    #[rstest]
    #[case("guardian")]
    #[case("")]
    fn unknown_category_is_rejected(#[case] raw: &str) {
        let err = raw.parse::<ActorCategory>().expect_err("closed set");
        assert!(matches!(err, PartitionResolutionError::InvalidCategory { .. }));
    }

    #[rstest]
    fn category_parsing_ignores_case_and_padding() {
        assert_eq!(" Examiner ".parse::<ActorCategory>(), Ok(ActorCategory::Examiner));
    }

    #[rstest]
    fn probe_order_is_students_first() {
        assert_eq!(
            Partition::FEDERATED_PROBE_ORDER,
            [
                Partition::StudentOrdinary,
                Partition::StudentAdvanced,
                Partition::Teacher,
                Partition::Examiner,
                Partition::Admin,
            ]
        );
    }

    #[rstest]
    fn partitions_for_student_without_level_covers_both_levels() {
        let partitions = partitions_for(ActorCategory::Student, None).expect("student scope");
        assert_eq!(
            partitions,
            vec![Partition::StudentOrdinary, Partition::StudentAdvanced]
        );
    }

    #[rstest]
    fn table_names_round_trip() {
        for partition in Partition::FEDERATED_PROBE_ORDER {
            assert_eq!(Partition::from_table_name(partition.table_name()), Some(partition));
        }
        assert_eq!(Partition::from_table_name("audit_log"), None);
    }
}
