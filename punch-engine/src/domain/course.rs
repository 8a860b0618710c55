//! Course definitions as supplied by the storage collaborator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::ids::{ControlCode, CourseId};

/// How punches are matched against the course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckingMode {
    /// Controls must be visited in the listed order.
    #[default]
    Classic,
    /// Controls may be visited in any order; only completeness matters.
    FreeOrder,
}

/// One control on a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSpec {
    /// Primary code expected at this position.
    pub code: ControlCode,

    /// Other codes accepted in place of `code` (e.g. a spare unit).
    #[serde(default)]
    pub alternates: BTreeSet<ControlCode>,

    /// Radio control used for live commentary.
    #[serde(default)]
    pub is_radio: bool,

    /// May be punched at any point of the course.
    #[serde(default)]
    pub out_of_order: bool,
}

impl ControlSpec {
    /// A plain required control.
    pub fn new(code: ControlCode) -> Self {
        Self {
            code,
            alternates: BTreeSet::new(),
            is_radio: false,
            out_of_order: false,
        }
    }

    /// Accept an additional code at this position.
    pub fn with_alternate(mut self, code: ControlCode) -> Self {
        self.alternates.insert(code);
        self
    }

    /// Mark as a radio control.
    pub fn radio(mut self) -> Self {
        self.is_radio = true;
        self
    }

    /// Allow punching anywhere on the course.
    pub fn unordered(mut self) -> Self {
        self.out_of_order = true;
        self
    }

    /// Whether a punched code satisfies this control.
    pub fn accepts(&self, code: ControlCode) -> bool {
        self.code == code || self.alternates.contains(&code)
    }

    /// Whether missing this control makes the run a mispunch.
    pub fn is_required(&self) -> bool {
        !self.is_radio && !self.out_of_order
    }
}

/// A course: an ordered list of controls, the last of which is the finish.
///
/// A course always has at least one control; this is enforced at
/// construction, including when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCourse")]
pub struct CourseDefinition {
    id: CourseId,
    name: String,
    controls: Vec<ControlSpec>,
    checking_mode: CheckingMode,
}

#[derive(Deserialize)]
struct RawCourse {
    id: CourseId,
    #[serde(default)]
    name: String,
    controls: Vec<ControlSpec>,
    #[serde(default)]
    checking_mode: CheckingMode,
}

impl TryFrom<RawCourse> for CourseDefinition {
    type Error = DomainError;

    fn try_from(raw: RawCourse) -> Result<Self, Self::Error> {
        CourseDefinition::new(raw.id, raw.name, raw.controls, raw.checking_mode)
    }
}

impl CourseDefinition {
    /// Create a course, rejecting an empty control list.
    pub fn new(
        id: CourseId,
        name: impl Into<String>,
        controls: Vec<ControlSpec>,
        checking_mode: CheckingMode,
    ) -> Result<Self, DomainError> {
        if controls.is_empty() {
            return Err(DomainError::EmptyCourse(id));
        }
        Ok(Self {
            id,
            name: name.into(),
            controls,
            checking_mode,
        })
    }

    /// Convenience constructor for a course of plain required controls.
    pub fn from_codes(
        id: CourseId,
        codes: &[u16],
        checking_mode: CheckingMode,
    ) -> Result<Self, DomainError> {
        let controls = codes
            .iter()
            .map(|c| ControlSpec::new(ControlCode(*c)))
            .collect();
        Self::new(id, format!("course {id}"), controls, checking_mode)
    }

    /// Returns the course id.
    pub fn id(&self) -> CourseId {
        self.id
    }

    /// Returns the course name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the controls in course order.
    pub fn controls(&self) -> &[ControlSpec] {
        &self.controls
    }

    /// Returns the checking mode.
    pub fn checking_mode(&self) -> CheckingMode {
        self.checking_mode
    }

    /// Index of the final control, which doubles as the finish.
    pub fn finish_index(&self) -> usize {
        self.controls.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_course_rejected() {
        let err = CourseDefinition::new(CourseId(1), "A", vec![], CheckingMode::Classic);
        assert!(matches!(err, Err(DomainError::EmptyCourse(CourseId(1)))));
    }

    #[test]
    fn from_codes_builds_required_controls() {
        let course = CourseDefinition::from_codes(CourseId(2), &[31, 32, 33], CheckingMode::Classic)
            .unwrap();
        assert_eq!(course.controls().len(), 3);
        assert!(course.controls().iter().all(ControlSpec::is_required));
        assert_eq!(course.finish_index(), 2);
    }

    #[test]
    fn alternates_are_accepted() {
        let spec = ControlSpec::new(ControlCode(31)).with_alternate(ControlCode(131));
        assert!(spec.accepts(ControlCode(31)));
        assert!(spec.accepts(ControlCode(131)));
        assert!(!spec.accepts(ControlCode(32)));
    }

    #[test]
    fn radio_and_unordered_not_required() {
        assert!(!ControlSpec::new(ControlCode(50)).radio().is_required());
        assert!(!ControlSpec::new(ControlCode(51)).unordered().is_required());
    }

    #[test]
    fn deserialize_validates() {
        let json = r#"{"id": 4, "name": "B", "controls": [{"code": 31}, {"code": 32, "is_radio": true}]}"#;
        let course: CourseDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(course.checking_mode(), CheckingMode::Classic);
        assert!(course.controls()[1].is_radio);

        let empty = r#"{"id": 5, "controls": []}"#;
        assert!(serde_json::from_str::<CourseDefinition>(empty).is_err());
    }

    #[test]
    fn deserialize_free_order() {
        let json = r#"{"id": 6, "controls": [{"code": 31}], "checking_mode": "free_order"}"#;
        let course: CourseDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(course.checking_mode(), CheckingMode::FreeOrder);
    }
}
