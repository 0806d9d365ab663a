//! Contact records and submission identifiers.
//!
//! A `Contact` is the only persisted entity. Records sharing an email or a
//! phone number belong to the same identity cluster; exactly one of them is
//! `Primary` and every other record links to it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum accepted email length (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 320;

/// Maximum accepted phone number length.
pub const MAX_PHONE_LEN: usize = 64;

/// Monotonically assigned contact identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContactId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Whether a record is the canonical record of its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    /// Canonical record of the cluster.
    Primary,
    /// Absorbed into a cluster; `linked_id` points at the primary.
    Secondary,
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A stored contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Unique id assigned by the store.
    pub id: ContactId,
    /// Email, if the submission carried one.
    pub email: Option<String>,
    /// Phone number, if the submission carried one.
    pub phone_number: Option<String>,
    /// Owning primary; set iff `link_precedence` is `Secondary`.
    pub linked_id: Option<ContactId>,
    /// Primary or secondary.
    pub link_precedence: LinkPrecedence,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Last precedence change (or creation time).
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Builds a stored record from a creation request.
    #[must_use]
    pub fn from_new(id: ContactId, new: NewContact, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: new.email,
            phone_number: new.phone_number,
            linked_id: new.linked_id,
            link_precedence: new.link_precedence,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true for the canonical record of a cluster.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        matches!(self.link_precedence, LinkPrecedence::Primary)
    }

    /// The id of the record owning this one's cluster: `linked_id` for a
    /// secondary, the record itself otherwise.
    #[must_use]
    pub fn primary_id(&self) -> ContactId {
        match self.link_precedence {
            LinkPrecedence::Primary => self.id,
            LinkPrecedence::Secondary => self.linked_id.unwrap_or(self.id),
        }
    }

    /// Demotes this record to a secondary of `primary`.
    pub fn demote(&mut self, primary: ContactId, now: DateTime<Utc>) {
        self.link_precedence = LinkPrecedence::Secondary;
        self.linked_id = Some(primary);
        self.updated_at = now;
    }

    /// Returns true if this record matches `ids` on every present field.
    #[must_use]
    pub fn matches_exact(&self, ids: &Identifiers) -> bool {
        let email_ok = ids
            .email()
            .map_or(true, |e| self.email.as_deref() == Some(e));
        let phone_ok = ids
            .phone_number()
            .map_or(true, |p| self.phone_number.as_deref() == Some(p));
        email_ok && phone_ok
    }
}

/// A record the store should create. The store assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// A fresh primary carrying the submission's identifiers.
    #[must_use]
    pub fn primary(ids: &Identifiers) -> Self {
        Self {
            email: ids.email().map(str::to_string),
            phone_number: ids.phone_number().map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// A secondary of `primary` carrying the submission's identifiers.
    #[must_use]
    pub fn secondary(ids: &Identifiers, primary: ContactId) -> Self {
        Self {
            email: ids.email().map(str::to_string),
            phone_number: ids.phone_number().map(str::to_string),
            linked_id: Some(primary),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

/// A validated `(email, phoneNumber)` submission.
///
/// Values are trimmed; blank values count as absent. At least one field is
/// always present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifiers {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Identifiers {
    /// Validates and normalizes a submission.
    ///
    /// # Errors
    /// - `MissingIdentifier` if both fields are absent or blank
    /// - `FieldTooLong` if a field exceeds its length limit
    pub fn new(
        email: Option<impl AsRef<str>>,
        phone_number: Option<impl AsRef<str>>,
    ) -> Result<Self, ValidationError> {
        let email = clean(email);
        let phone_number = clean(phone_number);

        if email.is_none() && phone_number.is_none() {
            return Err(ValidationError::MissingIdentifier);
        }
        if let Some(e) = email.as_deref() {
            if e.len() > MAX_EMAIL_LEN {
                return Err(ValidationError::FieldTooLong {
                    field: "email".to_string(),
                    max_length: MAX_EMAIL_LEN,
                });
            }
        }
        if let Some(p) = phone_number.as_deref() {
            if p.len() > MAX_PHONE_LEN {
                return Err(ValidationError::FieldTooLong {
                    field: "phoneNumber".to_string(),
                    max_length: MAX_PHONE_LEN,
                });
            }
        }

        Ok(Self {
            email,
            phone_number,
        })
    }

    /// Shorthand for a submission carrying both fields.
    ///
    /// # Errors
    /// See [`Identifiers::new`].
    pub fn pair(email: &str, phone_number: &str) -> Result<Self, ValidationError> {
        Self::new(Some(email), Some(phone_number))
    }

    /// The submitted email.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The submitted phone number.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// Normalized lock keys for this submission, one per present field.
    ///
    /// Emails compare case-insensitively; phone numbers by their digits, so
    /// `+1 (555) 010` and `1555010` land on the same key.
    #[must_use]
    pub fn lock_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(e) = self.email.as_deref() {
            keys.push(format!("email:{}", e.to_lowercase()));
        }
        if let Some(p) = self.phone_number.as_deref() {
            let digits: String = p.chars().filter(char::is_ascii_digit).collect();
            let key = if digits.is_empty() { p } else { digits.as_str() };
            keys.push(format!("phone:{key}"));
        }
        keys
    }
}

impl fmt::Display for Identifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(email={}, phoneNumber={})",
            self.email.as_deref().unwrap_or("-"),
            self.phone_number.as_deref().unwrap_or("-")
        )
    }
}

fn clean(value: Option<impl AsRef<str>>) -> Option<String> {
    value
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, email: Option<&str>, phone: Option<&str>) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(id),
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_identifiers_require_one_field() {
        let err = Identifiers::new(None::<&str>, None::<&str>).unwrap_err();
        assert!(matches!(err, ValidationError::MissingIdentifier));

        let err = Identifiers::new(Some("  "), Some("")).unwrap_err();
        assert!(matches!(err, ValidationError::MissingIdentifier));
    }

    #[test]
    fn test_identifiers_trim_and_drop_blank() {
        let ids = Identifiers::new(Some(" a@x.com "), Some("   ")).unwrap();
        assert_eq!(ids.email(), Some("a@x.com"));
        assert_eq!(ids.phone_number(), None);
    }

    #[test]
    fn test_identifiers_length_limits() {
        let long = "x".repeat(MAX_PHONE_LEN + 1);
        let err = Identifiers::new(None::<&str>, Some(long)).unwrap_err();
        assert!(matches!(err, ValidationError::FieldTooLong { max_length: MAX_PHONE_LEN, .. }));
    }

    #[test]
    fn test_lock_keys_normalize() {
        let a = Identifiers::pair("Doc@Example.com", "+1 (555) 010").unwrap();
        let b = Identifiers::pair("doc@example.com", "1555010").unwrap();
        assert_eq!(a.lock_keys(), b.lock_keys());
        assert_eq!(a.lock_keys().len(), 2);
    }

    #[test]
    fn test_matches_exact_treats_absent_field_as_wildcard() {
        let c = record(1, Some("a@x.com"), Some("111"));
        assert!(c.matches_exact(&Identifiers::pair("a@x.com", "111").unwrap()));
        assert!(c.matches_exact(&Identifiers::new(Some("a@x.com"), None::<&str>).unwrap()));
        assert!(!c.matches_exact(&Identifiers::pair("a@x.com", "222").unwrap()));
    }

    #[test]
    fn test_primary_id_and_demote() {
        let mut c = record(5, Some("b@x.com"), None);
        assert_eq!(c.primary_id(), ContactId::new(5));

        c.demote(ContactId::new(2), Utc::now());
        assert!(!c.is_primary());
        assert_eq!(c.linked_id, Some(ContactId::new(2)));
        assert_eq!(c.primary_id(), ContactId::new(2));
    }

    #[test]
    fn test_contact_json_shape() {
        let c = record(1, Some("a@x.com"), None);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["linkPrecedence"], "primary");
        assert!(json["phoneNumber"].is_null());
        assert!(json["linkedId"].is_null());
        assert!(json.get("createdAt").is_some());
    }
}
