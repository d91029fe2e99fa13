//! Rule merger.
//!
//! Combines a caller's filter with constraints the system injects (for
//! example "only rows owned by the caller"). Each part becomes one opaque
//! child of an AND group; the inputs are only borrowed.

use crate::ast::{RuleGroup, RuleItem};

/// AND together every present group.
///
/// - no groups: an empty AND group, which matches everything
/// - one group: that group as is, not re-wrapped
/// - several: `{AND, [g1, g2, ...]}`
///
/// ```
/// use rulequery::ast::RuleGroup;
/// use rulequery::merge::merge;
///
/// let caller = RuleGroup::or(vec![]);
/// assert_eq!(merge([Some(&caller), None]), caller);
/// ```
pub fn merge<'a, I>(parts: I) -> RuleGroup
where
    I: IntoIterator<Item = Option<&'a RuleGroup>>,
{
    let mut groups: Vec<&RuleGroup> = parts.into_iter().flatten().collect();

    match groups.len() {
        0 => RuleGroup::default(),
        1 => groups.remove(0).clone(),
        _ => RuleGroup::and(
            groups
                .into_iter()
                .map(|g| RuleItem::Group(g.clone()))
                .collect(),
        ),
    }
}
