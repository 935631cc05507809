//! Tagging conventions for list-matched flows.

use model::EnrichedFlow;

/// Tag id placed into `tid` for address-list hits. Chosen to be uncommon in
/// regular traffic so downstream filters can select it (`tid 65001`).
pub const TAG_ID_LISTED: u32 = 65001;

/// Annotate a flow as matched against a bad-address list: sets `tid`,
/// `inlist` and a short machine-friendly `note`.
pub fn tag_as_listed(flow: &mut EnrichedFlow) {
    tag_with_id(flow, TAG_ID_LISTED, "bad_ip");
}

/// Apply a specific numeric tag and toggle `inlist`. The note is only set
/// when none is present, normalized to a lowercase token.
pub fn tag_with_id(flow: &mut EnrichedFlow, tag_id: u32, note: &str) {
    flow.tid = tag_id;
    flow.inlist = true;
    if flow.note.is_empty() {
        let normalized = note.trim().to_ascii_lowercase().replace(' ', "_");
        if !normalized.is_empty() {
            flow.note = normalized;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_notes_are_preserved() {
        let mut flow = EnrichedFlow {
            note: "seen_before".into(),
            ..Default::default()
        };
        tag_as_listed(&mut flow);
        assert_eq!(flow.note, "seen_before");
        assert_eq!(flow.tid, TAG_ID_LISTED);
        assert!(flow.inlist);
    }

    #[test]
    fn notes_are_normalized() {
        let mut flow = EnrichedFlow::default();
        tag_with_id(&mut flow, 7, " Known Bad ");
        assert_eq!(flow.note, "known_bad");
        assert_eq!(flow.tid, 7);
    }
}
