//! Device labels
//!
//! Tags of the form `caphvlabel:<key>=<value>` are read as labels so that
//! device selectors can be evaluated against them.

use hivelocity_client::tag::LABEL_TAG_PREFIX;
use std::collections::BTreeMap;

/// Labels encoded in a tag list. The first occurrence of a key wins;
/// malformed label tags are ignored.
pub fn labels_from_tags(tags: &[String]) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for tag in tags {
        let Some(label) = tag.strip_prefix(LABEL_TAG_PREFIX) else {
            continue;
        };
        let mut parts = label.split('=');
        if let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) {
            if !key.is_empty() {
                labels.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }
    }
    labels
}
