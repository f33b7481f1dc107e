use uuid::Uuid;

/// Tag of the initial, empty state every graph starts from.
pub const ROOT_TAG: &str = "ROOT";

/// Handle of a node inside the graph arena. Never reused within one graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

/// Mints a fresh merge tag.
pub fn fresh_merge_tag() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_tags_are_unique_uuids() {
        let a = fresh_merge_tag();
        let b = fresh_merge_tag();
        assert_ne!(a, b);
        let parsed = Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_ne!(a, ROOT_TAG);
    }
}
