//! Identity records, their category-specific profiles, and registration input.
//!
//! Profiles are a tagged union keyed by actor category. Each variant carries
//! only the fields valid for that kind of actor, so a teacher can never carry
//! a candidate number and an examiner never has a school.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::credential::CredentialHash;
use super::email::EmailAddress;
use super::identifier::IdentityId;
use super::partition::{ActorCategory, ExamLevel, Partition};

/// Maximum length of free-text profile fields.
pub const PROFILE_FIELD_MAX: usize = 200;

/// Minimum number of characters in a password.
pub const PASSWORD_MIN: usize = 8;

/// Validation errors for identity input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityValidationError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("profile for {profile} does not match category {category}")]
    ProfileCategoryMismatch {
        profile: ActorCategory,
        category: ActorCategory,
    },
    #[error("unknown registration status: {value}")]
    UnknownStatus { value: String },
}

/// Registration lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Suspended,
}

impl RegistrationStatus {
    /// Stable lower-case name used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = IdentityValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "suspended" => Ok(Self::Suspended),
            other => Err(IdentityValidationError::UnknownStatus {
                value: other.to_owned(),
            }),
        }
    }
}

/// Profile of a candidate sitting examinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StudentProfile {
    pub full_name: String,
    pub school: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_number: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
}

/// Profile of a teacher registering candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TeacherProfile {
    pub full_name: String,
    pub school: String,
    pub region: String,
    #[serde(default)]
    pub subjects: Vec<String>,
}

/// Profile of an examiner; `institution` is their affiliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExaminerProfile {
    pub full_name: String,
    pub institution: String,
    pub region: String,
    pub specialization: String,
}

/// Profile of board staff; `office` is their affiliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdminProfile {
    pub full_name: String,
    pub region: String,
    pub office: String,
}

/// Category-specific profile attributes.
///
/// # Examples
/// ```
/// use examboard_identity::domain::{ActorCategory, ProfileAttributes, TeacherProfile};
///
/// let profile = ProfileAttributes::Teacher(TeacherProfile {
///     full_name: "Ada Mensah".into(),
///     school: "Accra High".into(),
///     region: "Greater Accra".into(),
///     subjects: vec!["Physics".into()],
/// });
/// assert_eq!(profile.category(), ActorCategory::Teacher);
/// assert_eq!(profile.affiliation(), "Accra High");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileAttributes {
    Student(StudentProfile),
    Teacher(TeacherProfile),
    Examiner(ExaminerProfile),
    Admin(AdminProfile),
}

impl ProfileAttributes {
    /// Category this profile belongs to.
    pub const fn category(&self) -> ActorCategory {
        match self {
            Self::Student(_) => ActorCategory::Student,
            Self::Teacher(_) => ActorCategory::Teacher,
            Self::Examiner(_) => ActorCategory::Examiner,
            Self::Admin(_) => ActorCategory::Admin,
        }
    }

    pub fn full_name(&self) -> &str {
        match self {
            Self::Student(p) => &p.full_name,
            Self::Teacher(p) => &p.full_name,
            Self::Examiner(p) => &p.full_name,
            Self::Admin(p) => &p.full_name,
        }
    }

    pub fn region(&self) -> &str {
        match self {
            Self::Student(p) => &p.region,
            Self::Teacher(p) => &p.region,
            Self::Examiner(p) => &p.region,
            Self::Admin(p) => &p.region,
        }
    }

    /// School, institution, or office the actor is attached to.
    pub fn affiliation(&self) -> &str {
        match self {
            Self::Student(p) => &p.school,
            Self::Teacher(p) => &p.school,
            Self::Examiner(p) => &p.institution,
            Self::Admin(p) => &p.office,
        }
    }

    /// Check required fields and lengths, and that the variant matches the
    /// declared category.
    pub fn validate_for(&self, category: ActorCategory) -> Result<(), IdentityValidationError> {
        if self.category() != category {
            return Err(IdentityValidationError::ProfileCategoryMismatch {
                profile: self.category(),
                category,
            });
        }
        required("fullName", self.full_name())?;
        required("region", self.region())?;
        match self {
            Self::Student(p) => {
                required("school", &p.school)?;
                if let Some(number) = &p.candidate_number {
                    required("candidateNumber", number)?;
                }
                p.subjects.iter().try_for_each(|s| required("subjects", s))
            }
            Self::Teacher(p) => {
                required("school", &p.school)?;
                p.subjects.iter().try_for_each(|s| required("subjects", s))
            }
            Self::Examiner(p) => {
                required("institution", &p.institution)?;
                required("specialization", &p.specialization)
            }
            Self::Admin(p) => required("office", &p.office),
        }
    }
}

fn required(field: &'static str, value: &str) -> Result<(), IdentityValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(IdentityValidationError::EmptyField { field });
    }
    if trimmed.chars().count() > PROFILE_FIELD_MAX {
        return Err(IdentityValidationError::FieldTooLong {
            field,
            max: PROFILE_FIELD_MAX,
        });
    }
    Ok(())
}

/// Security question and the codec hash of its normalised answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityQuestion {
    pub question: String,
    pub answer_hash: CredentialHash,
}

/// Canonical identity entity as held by a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub email: EmailAddress,
    pub credential_hash: CredentialHash,
    pub partition: Partition,
    pub registration_status: RegistrationStatus,
    pub profile: ProfileAttributes,
    pub security_question: Option<SecurityQuestion>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    pub fn category(&self) -> ActorCategory {
        self.partition.category()
    }

    pub fn exam_level(&self) -> Option<ExamLevel> {
        self.partition.exam_level()
    }

    /// View of the record without credential material.
    pub fn to_public(&self) -> PublicIdentity {
        PublicIdentity {
            id: self.id.clone(),
            email: self.email.clone(),
            category: self.category(),
            exam_level: self.exam_level(),
            registration_status: self.registration_status,
            profile: self.profile.clone(),
            security_question: self
                .security_question
                .as_ref()
                .map(|question| question.question.clone()),
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }

    /// Copy of the record under another partition and identifier.
    ///
    /// Every business field, including the creation timestamp and the
    /// credential hash, is carried over unchanged.
    pub fn relocated(&self, partition: Partition, id: IdentityId) -> Self {
        Self {
            id,
            partition,
            ..self.clone()
        }
    }

    /// Apply the mutable fields `newer` changed relative to `base` on top of
    /// `self`. Fields `newer` left alone keep this record's value.
    pub fn merged_changes(&self, base: &Self, newer: &Self) -> Self {
        fn pick<T: Clone + PartialEq>(ours: &T, base: &T, newer: &T) -> T {
            if newer == base { ours.clone() } else { newer.clone() }
        }
        Self {
            credential_hash: pick(
                &self.credential_hash,
                &base.credential_hash,
                &newer.credential_hash,
            ),
            registration_status: pick(
                &self.registration_status,
                &base.registration_status,
                &newer.registration_status,
            ),
            profile: pick(&self.profile, &base.profile, &newer.profile),
            security_question: pick(
                &self.security_question,
                &base.security_question,
                &newer.security_question,
            ),
            last_login: pick(&self.last_login, &base.last_login, &newer.last_login),
            ..self.clone()
        }
    }
}

/// Externally visible identity, free of credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIdentity {
    pub id: IdentityId,
    pub email: EmailAddress,
    pub category: ActorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_level: Option<ExamLevel>,
    pub registration_status: RegistrationStatus,
    pub profile: ProfileAttributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_question: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Registration input for [`IdentityService::create_identity`].
///
/// [`IdentityService::create_identity`]: crate::domain::IdentityService::create_identity
#[derive(Clone)]
pub struct NewIdentity {
    pub email: String,
    pub category: ActorCategory,
    pub exam_level: Option<ExamLevel>,
    pub profile: ProfileAttributes,
    pub registration_status: RegistrationStatus,
    password: Zeroizing<String>,
    security_question: Option<(String, Zeroizing<String>)>,
}

impl NewIdentity {
    /// Registration with `pending` status and no security question.
    pub fn new(
        email: impl Into<String>,
        category: ActorCategory,
        exam_level: Option<ExamLevel>,
        password: impl Into<String>,
        profile: ProfileAttributes,
    ) -> Self {
        Self {
            email: email.into(),
            category,
            exam_level,
            profile,
            registration_status: RegistrationStatus::Pending,
            password: Zeroizing::new(password.into()),
            security_question: None,
        }
    }

    pub fn with_status(mut self, status: RegistrationStatus) -> Self {
        self.registration_status = status;
        self
    }

    pub fn with_security_question(
        mut self,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        self.security_question = Some((question.into(), Zeroizing::new(answer.into())));
        self
    }

    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    pub fn security_question(&self) -> Option<(&str, &str)> {
        self.security_question
            .as_ref()
            .map(|(question, answer)| (question.as_str(), answer.as_str()))
    }

    /// Validate fields that do not depend on storage.
    pub fn validate(&self) -> Result<(), IdentityValidationError> {
        self.profile.validate_for(self.category)?;
        if self.password.chars().count() < PASSWORD_MIN {
            return Err(IdentityValidationError::PasswordTooShort { min: PASSWORD_MIN });
        }
        if let Some((question, answer)) = &self.security_question {
            required("securityQuestion", question)?;
            required("securityAnswer", answer)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NewIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewIdentity")
            .field("email", &self.email)
            .field("category", &self.category)
            .field("exam_level", &self.exam_level)
            .field("profile", &self.profile)
            .field("registration_status", &self.registration_status)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for profile validation and public views.
    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn student_profile() -> ProfileAttributes {
        ProfileAttributes::Student(StudentProfile {
            full_name: "Kofi Boateng".into(),
            school: "Cape Coast Academy".into(),
            region: "Central".into(),
            candidate_number: Some("0042".into()),
            subjects: vec!["Mathematics".into(), "Chemistry".into()],
        })
    }

    #[fixture]
    fn record(student_profile: ProfileAttributes) -> IdentityRecord {
        IdentityRecord {
            id: IdentityId::new("EXB-ST-1-0001").expect("valid id"),
            email: EmailAddress::parse("s1@x.test").expect("valid email"),
            credential_hash: CredentialHash::from_stored("$argon2id$stub"),
            partition: Partition::StudentOrdinary,
            registration_status: RegistrationStatus::Pending,
            profile: student_profile,
            security_question: Some(SecurityQuestion {
                question: "First pet?".into(),
                answer_hash: CredentialHash::from_stored("$argon2id$answer"),
            }),
            created_at: Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().expect("valid"),
            last_login: None,
        }
    }

    #[rstest]
    fn profile_serialises_with_kind_tag(student_profile: ProfileAttributes) {
        let value = serde_json::to_value(&student_profile).expect("serialise");
        assert_eq!(value["kind"], json!("student"));
        assert_eq!(value["candidateNumber"], json!("0042"));
    }

    #[rstest]
    fn cross_category_fields_are_rejected_on_decode() {
        let payload = json!({
            "kind": "teacher",
            "fullName": "T",
            "school": "S",
            "region": "R",
            "candidateNumber": "1",
        });
        assert!(serde_json::from_value::<ProfileAttributes>(payload).is_err());
    }

    #[rstest]
    fn profile_must_match_category(student_profile: ProfileAttributes) {
        let err = student_profile
            .validate_for(ActorCategory::Teacher)
            .expect_err("mismatch");
        assert_eq!(
            err,
            IdentityValidationError::ProfileCategoryMismatch {
                profile: ActorCategory::Student,
                category: ActorCategory::Teacher,
            }
        );
    }

    #[rstest]
    fn blank_required_fields_are_rejected() {
        let profile = ProfileAttributes::Admin(AdminProfile {
            full_name: "A".into(),
            region: "  ".into(),
            office: "HQ".into(),
        });
        assert_eq!(
            profile.validate_for(ActorCategory::Admin),
            Err(IdentityValidationError::EmptyField { field: "region" })
        );
    }

    #[rstest]
    fn short_passwords_are_rejected(student_profile: ProfileAttributes) {
        let input = NewIdentity::new(
            "s1@x.test",
            ActorCategory::Student,
            Some(ExamLevel::Ordinary),
            "short",
            student_profile,
        );
        assert_eq!(
            input.validate(),
            Err(IdentityValidationError::PasswordTooShort { min: PASSWORD_MIN })
        );
        assert!(!format!("{input:?}").contains("short"));
    }

    #[rstest]
    fn public_view_hides_hashes(record: IdentityRecord) {
        let value = serde_json::to_value(record.to_public()).expect("serialise");
        let text = value.to_string();
        assert!(!text.contains("argon2id"));
        assert_eq!(value["category"], json!("student"));
        assert_eq!(value["examLevel"], json!("ordinary"));
        assert_eq!(value["securityQuestion"], json!("First pet?"));
    }

    #[rstest]
    fn relocation_keeps_business_fields(record: IdentityRecord) {
        let new_id = IdentityId::new("EXB-ST-2-0002").expect("valid id");
        let moved = record.relocated(Partition::StudentAdvanced, new_id.clone());
        assert_eq!(moved.id, new_id);
        assert_eq!(moved.exam_level(), Some(ExamLevel::Advanced));
        assert_eq!(moved.email, record.email);
        assert_eq!(moved.profile, record.profile);
        assert_eq!(moved.credential_hash, record.credential_hash);
        assert_eq!(moved.created_at, record.created_at);
    }

    #[rstest]
    #[case("pending", RegistrationStatus::Pending)]
    #[case("suspended", RegistrationStatus::Suspended)]
    fn statuses_parse(#[case] raw: &str, #[case] expected: RegistrationStatus) {
        assert_eq!(raw.parse::<RegistrationStatus>(), Ok(expected));
    }

    #[rstest]
    fn merged_changes_keep_edits_from_both_sides(record: IdentityRecord) {
        let copy = record.relocated(
            Partition::StudentAdvanced,
            IdentityId::new("EXB-ST-2-0002").expect("valid id"),
        );
        let logged_in = IdentityRecord {
            last_login: Some(record.created_at),
            ..copy.clone()
        };
        let suspended = IdentityRecord {
            registration_status: RegistrationStatus::Suspended,
            ..record.clone()
        };

        let merged = logged_in.merged_changes(&record, &suspended);

        assert_eq!(merged.id, copy.id);
        assert_eq!(merged.partition, Partition::StudentAdvanced);
        assert_eq!(merged.registration_status, RegistrationStatus::Suspended);
        assert_eq!(merged.last_login, Some(record.created_at));
        assert_eq!(copy.merged_changes(&record, &record), copy);
    }
}
