//! IdentityView - the consolidated answer of an `identify` call.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId};

/// Consolidated view of one identity cluster.
///
/// Ordering rules:
/// - `emails` / `phone_numbers`: the primary's value first, then each distinct
///   non-null secondary value in ascending record id order.
/// - `secondary_contact_ids`: ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    /// Id of the cluster's primary record.
    pub primary_contact_id: ContactId,
    /// Distinct emails of the cluster.
    pub emails: Vec<String>,
    /// Distinct phone numbers of the cluster.
    pub phone_numbers: Vec<String>,
    /// Ids of every non-primary record in the cluster.
    pub secondary_contact_ids: Vec<ContactId>,
}

impl IdentityView {
    /// Assembles the view for `primary_id` from its cluster records.
    ///
    /// `cluster` is expected to hold the primary plus every record linked to
    /// it, in any order. Returns `None` if the primary is not among them.
    #[must_use]
    pub fn assemble(primary_id: ContactId, cluster: &[Contact]) -> Option<Self> {
        let primary = cluster.iter().find(|c| c.id == primary_id)?;

        let mut secondaries: Vec<&Contact> =
            cluster.iter().filter(|c| c.id != primary_id).collect();
        secondaries.sort_by_key(|c| c.id);

        let emails = ordered_distinct(
            primary.email.as_deref(),
            secondaries.iter().map(|c| c.email.as_deref()),
        );
        let phone_numbers = ordered_distinct(
            primary.phone_number.as_deref(),
            secondaries.iter().map(|c| c.phone_number.as_deref()),
        );

        Some(Self {
            primary_contact_id: primary_id,
            emails,
            phone_numbers,
            secondary_contact_ids: secondaries.iter().map(|c| c.id).collect(),
        })
    }
}

/// First-seen-wins dedup: `head` first, then `rest` in the given order.
fn ordered_distinct<'a>(
    head: Option<&'a str>,
    rest: impl Iterator<Item = Option<&'a str>>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in std::iter::once(head).chain(rest).flatten() {
        if seen.insert(value) {
            out.push(value.to_string());
        }
    }
    out
}
