//! Flow rule representation and `ovs-ofctl` renderings.

use std::fmt;

/// One switch rule addressed to a bridge: table, priority, match, action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Flow {
    /// Flow table number.
    pub table: u16,
    /// Match priority; higher wins.
    pub priority: u16,
    /// OVS match predicate, e.g. `tcp,nw_src=10.0.0.0/8,tp_src=80`.
    pub matches: String,
    /// OVS action list, e.g. `normal` or `drop`.
    pub actions: String,
}

impl Flow {
    /// Creates a flow in table 0.
    pub fn new(priority: u16, matches: impl Into<String>, actions: impl Into<String>) -> Self {
        Self {
            table: 0,
            priority,
            matches: matches.into(),
            actions: actions.into(),
        }
    }

    /// Creates a flow in an explicit table.
    pub fn in_table(
        table: u16,
        priority: u16,
        matches: impl Into<String>,
        actions: impl Into<String>,
    ) -> Self {
        Self {
            table,
            priority,
            matches: matches.into(),
            actions: actions.into(),
        }
    }

    /// Rendering for `ovs-ofctl add-flow`.
    pub fn to_ofctl_add(&self) -> String {
        format!(
            "table={},priority={},{},actions={}",
            self.table, self.priority, self.matches, self.actions
        )
    }

    /// Rendering for `ovs-ofctl --strict del-flows`; the action list is
    /// omitted since deletion matches on the rule itself.
    pub fn to_ofctl_del(&self) -> String {
        format!(
            "table={},priority={},{}",
            self.table, self.priority, self.matches
        )
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ofctl_add())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ofctl_add_rendering() {
        let f = Flow::new(26000, "tcp,nw_src=10.0.0.0/8,tp_src=80", "normal");
        assert_eq!(
            f.to_ofctl_add(),
            "table=0,priority=26000,tcp,nw_src=10.0.0.0/8,tp_src=80,actions=normal"
        );
    }

    #[test]
    fn test_ofctl_del_rendering() {
        let f = Flow::in_table(1, 100, "ip", "drop");
        assert_eq!(f.to_ofctl_del(), "table=1,priority=100,ip");
    }

    #[test]
    fn test_flow_hash_equality() {
        use std::collections::HashSet;
        let a = Flow::new(10, "ip", "normal");
        let b = Flow::new(10, "ip", "normal");
        let c = Flow::new(10, "ip", "drop");
        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }
}
