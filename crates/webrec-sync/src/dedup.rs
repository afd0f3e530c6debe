use std::collections::HashMap;

use webrec_core::WebinarRecord;

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// One record per id, in first-seen order.
    pub webinars: Vec<WebinarRecord>,
    pub duplicates_merged: usize,
    /// Records that arrived without an id; each counts as a validation error.
    pub dropped_without_id: usize,
}

/// Collapse records sharing an id. A later record replaces the kept one only
/// when the kept topic is a placeholder and the newcomer's is not.
pub fn deduplicate(records: Vec<WebinarRecord>) -> DedupOutcome {
    let mut out = DedupOutcome::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let id = record.id.trim();
        if id.is_empty() {
            out.dropped_without_id += 1;
            continue;
        }
        match index.get(id) {
            Some(&slot) => {
                out.duplicates_merged += 1;
                let kept = &mut out.webinars[slot];
                if kept.has_placeholder_topic() && !record.has_placeholder_topic() {
                    *kept = record;
                }
            }
            None => {
                index.insert(id.to_string(), out.webinars.len());
                out.webinars.push(record);
            }
        }
    }
    out
}
