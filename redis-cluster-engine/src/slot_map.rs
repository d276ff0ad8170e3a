use std::collections::BTreeMap;

use log::debug;

/// Number of hash slots in a Redis cluster.
pub const SLOT_SIZE: u16 = 16384;

#[derive(Debug)]
struct SlotMapValue {
    start: u16,
    node: usize,
}

/// Slot to master lookup of one topology snapshot.
///
/// Values are indexes into the node list of the snapshot owning the map.
#[derive(Debug, Default)]
pub(crate) struct SlotMap {
    slots: BTreeMap<u16, SlotMapValue>,
}

impl SlotMap {
    /// Builds the map from `(start, end, node)` intervals.
    ///
    /// An interval overlapping one that was already inserted is dropped, so
    /// every slot resolves to at most one node.
    pub(crate) fn from_intervals(intervals: impl IntoIterator<Item = (u16, u16, usize)>) -> Self {
        let mut intervals: Vec<_> = intervals.into_iter().collect();
        intervals.sort_unstable();

        let mut slots = BTreeMap::new();
        let mut covered_until: Option<u16> = None;
        for (start, end, node) in intervals {
            if covered_until.is_some_and(|until| start <= until) {
                debug!("Ignoring overlapping slot range {start}-{end} of node #{node}");
                continue;
            }
            covered_until = Some(end);
            slots.insert(end, SlotMapValue { start, node });
        }
        Self { slots }
    }

    pub(crate) fn node_for_slot(&self, slot: u16) -> Option<usize> {
        self.slots
            .range(slot..)
            .next()
            .and_then(|(end, value)| {
                if slot <= *end && value.start <= slot {
                    Some(value.node)
                } else {
                    None
                }
            })
    }

    /// Number of slots that resolve to a node.
    pub(crate) fn covered_slots(&self) -> usize {
        self.slots
            .iter()
            .map(|(end, value)| (end - value.start) as usize + 1)
            .sum()
    }
}
