//! Greedy, order-preserving packing of pending texts into sub-batches.
//!
//! Items are walked in their original order. A sub-batch keeps taking items
//! while the accumulated cost stays within the ceiling and closes as soon as
//! the next item would overflow it. An item that on its own costs more than
//! the ceiling allows is set aside as too long without closing or otherwise
//! disturbing the sub-batch being filled around it.

use std::collections::VecDeque;

use crate::ratelimit::Ceiling;
use crate::record::{ClassConfig, Record};
use crate::render::TextRenderer;
use crate::tokens::TokenEstimator;

/// A rendered record waiting to be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    /// Position of the record in the submitted slice
    pub index: usize,

    /// Text to embed
    pub text: String,

    /// Estimated token cost of `text`
    pub cost: usize,
}

impl PendingItem {
    pub fn new(index: usize, text: impl Into<String>, cost: usize) -> Self {
        Self {
            index,
            text: text.into(),
            cost,
        }
    }
}

/// Render and cost every record not flagged in `skip`.
///
/// Missing `skip` entries count as not skipped. Records the renderer has
/// nothing to embed for are left out.
pub fn pending_items<R>(
    records: &[Record],
    skip: &[bool],
    class_config: &ClassConfig,
    renderer: &R,
    estimator: &dyn TokenEstimator,
) -> Vec<PendingItem>
where
    R: TextRenderer + ?Sized,
{
    records
        .iter()
        .enumerate()
        .filter(|(index, _)| !skip.get(*index).copied().unwrap_or(false))
        .filter_map(|(index, record)| {
            let text = renderer.render(record, class_config)?;
            let cost = estimator.estimate(&text);
            Some(PendingItem::new(index, text, cost))
        })
        .collect()
}

/// One dispatch unit for the embedding client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubBatch {
    items: Vec<PendingItem>,
    cost: usize,
}

impl SubBatch {
    fn push(&mut self, item: PendingItem) {
        self.cost = self.cost.saturating_add(item.cost);
        self.items.push(item);
    }

    pub fn items(&self) -> &[PendingItem] {
        &self.items
    }

    /// Accumulated estimated cost
    pub fn cost(&self) -> usize {
        self.cost
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Original record indices, in dispatch order
    pub fn indices(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.index).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.items.iter().map(|item| item.text.clone()).collect()
    }

    pub fn into_items(self) -> Vec<PendingItem> {
        self.items
    }
}

/// An item whose cost alone exceeds the ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TooLong {
    pub index: usize,
    pub cost: usize,
    pub ceiling: usize,
}

/// Result of packing one sub-batch off the front of the queue
#[derive(Debug, Default)]
pub struct NextBatch {
    /// The packed sub-batch, `None` once nothing dispatchable is left
    pub batch: Option<SubBatch>,

    /// Items rejected while walking towards and through the sub-batch
    pub too_long: Vec<TooLong>,
}

/// Incremental packer over the pending queue of one call.
///
/// Each sub-batch is packed against the ceiling current at the time it is
/// requested, so capacity reported by the previous response is always used.
#[derive(Debug, Default)]
pub struct Packer {
    queue: VecDeque<PendingItem>,
}

impl Packer {
    pub fn new(items: impl IntoIterator<Item = PendingItem>) -> Self {
        Self {
            queue: items.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Items not yet packed
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Pack the next sub-batch of at most `max_items` items
    pub fn next_batch(&mut self, ceiling: Ceiling, max_items: usize) -> NextBatch {
        let max_items = max_items.max(1);
        let mut batch = SubBatch::default();
        let mut too_long = Vec::new();

        while let Some(item) = self.queue.front() {
            if item.cost > ceiling.limit {
                too_long.push(TooLong {
                    index: item.index,
                    cost: item.cost,
                    ceiling: ceiling.limit,
                });
                self.queue.pop_front();
                continue;
            }
            if batch.len() >= max_items {
                break;
            }
            // A lone item within the limit always goes out, possibly after a reset
            let fits = batch.is_empty() || batch.cost().saturating_add(item.cost) <= ceiling.available;
            if !fits {
                break;
            }
            if let Some(item) = self.queue.pop_front() {
                batch.push(item);
            }
        }

        NextBatch {
            batch: (!batch.is_empty()).then_some(batch),
            too_long,
        }
    }

    /// Take every item that was never packed
    pub fn drain(&mut self) -> impl Iterator<Item = PendingItem> + '_ {
        self.queue.drain(..)
    }
}

/// All sub-batches for `items` under one fixed ceiling
#[derive(Debug, Default)]
pub struct Packing {
    pub batches: Vec<SubBatch>,
    pub too_long: Vec<TooLong>,
}

/// Partition `items` into sub-batches whose cost stays within `ceiling`
pub fn pack(items: impl IntoIterator<Item = PendingItem>, ceiling: usize, max_items: usize) -> Packing {
    let mut packer = Packer::new(items);
    let mut packing = Packing::default();
    while !packer.is_empty() {
        let next = packer.next_batch(Ceiling::fixed(ceiling), max_items);
        packing.too_long.extend(next.too_long);
        match next.batch {
            Some(batch) => packing.batches.push(batch),
            None => break,
        }
    }
    packing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(costs: &[usize]) -> Vec<PendingItem> {
        costs
            .iter()
            .enumerate()
            .map(|(i, &cost)| PendingItem::new(i, format!("item {}", i), cost))
            .collect()
    }

    fn layout(packing: &Packing) -> Vec<Vec<usize>> {
        packing.batches.iter().map(SubBatch::indices).collect()
    }

    #[test]
    fn test_pack_greedy() {
        let packing = pack(items(&[3, 3, 3, 3, 3]), 9, 100);
        assert_eq!(layout(&packing), vec![vec![0, 1, 2], vec![3, 4]]);
        assert_eq!(packing.batches[0].cost(), 9);
        assert!(packing.too_long.is_empty());
    }

    #[test]
    fn test_pack_respects_max_items() {
        let packing = pack(items(&[1, 1, 1, 1, 1]), 100, 2);
        assert_eq!(layout(&packing), vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn test_pack_too_long_positions() {
        for position in 0..3 {
            let mut costs = vec![2, 2, 2];
            costs[position] = 6;
            let packing = pack(items(&costs), 5, 100);

            assert_eq!(
                packing.too_long,
                vec![TooLong {
                    index: position,
                    cost: 6,
                    ceiling: 5
                }]
            );
            let packed: Vec<usize> = packing.batches.iter().flat_map(SubBatch::indices).collect();
            let expected: Vec<usize> = (0..3).filter(|&i| i != position).collect();
            assert_eq!(packed, expected);
        }
    }

    #[test]
    fn test_too_long_does_not_close_batch() {
        // 0 and 2 share a sub-batch around the oversized 1
        let packing = pack(items(&[2, 9, 2, 2]), 5, 100);
        assert_eq!(layout(&packing), vec![vec![0, 2], vec![3]]);
        assert_eq!(packing.too_long.len(), 1);
        assert_eq!(packing.too_long[0].index, 1);
    }

    #[test]
    fn test_pack_preserves_order() {
        let costs = [4, 1, 7, 2, 2, 9, 3, 1, 1, 5];
        let packing = pack(items(&costs), 7, 3);
        let packed: Vec<usize> = packing.batches.iter().flat_map(SubBatch::indices).collect();
        let expected: Vec<usize> = costs
            .iter()
            .enumerate()
            .filter(|(_, c)| **c <= 7)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(packed, expected);
        for batch in &packing.batches {
            assert!(batch.cost() <= 7);
            assert!(batch.len() <= 3);
        }
    }

    #[test]
    fn test_pack_only_too_long() {
        let packing = pack(items(&[10, 10]), 5, 100);
        assert!(packing.batches.is_empty());
        assert_eq!(packing.too_long.len(), 2);
    }

    #[test]
    fn test_pack_empty() {
        let packing = pack(Vec::new(), 5, 100);
        assert!(packing.batches.is_empty());
        assert!(packing.too_long.is_empty());
    }

    #[test]
    fn test_next_batch_uses_latest_ceiling() {
        let mut packer = Packer::new(items(&[1, 3, 3, 3, 3, 3]));

        let first = packer.next_batch(Ceiling::UNBOUNDED, 1);
        assert_eq!(first.batch.unwrap().indices(), vec![0]);

        let second = packer.next_batch(Ceiling::fixed(9), 100);
        assert_eq!(second.batch.unwrap().indices(), vec![1, 2, 3]);

        // Ceiling shrinks
        let third = packer.next_batch(Ceiling::fixed(3), 100);
        assert_eq!(third.batch.unwrap().indices(), vec![4]);

        let fourth = packer.next_batch(Ceiling::fixed(2), 100);
        assert!(fourth.batch.is_none());
        assert_eq!(fourth.too_long[0].index, 5);
        assert!(packer.is_empty());
    }

    #[test]
    fn test_next_batch_lone_item_over_available() {
        let mut packer = Packer::new(items(&[8, 2]));
        let ceiling = Ceiling {
            available: 5,
            limit: 10,
        };

        let next = packer.next_batch(ceiling, 100);
        let batch = next.batch.unwrap();
        assert_eq!(batch.indices(), vec![0]);
        assert_eq!(batch.cost(), 8);
        assert!(next.too_long.is_empty());
        assert_eq!(packer.len(), 1);
    }

    #[test]
    fn test_pending_items() {
        use crate::render::PropertyRenderer;
        use crate::tokens::WhitespaceEstimator;

        let records = vec![
            Record::new("Note").with_property("body", "one two"),
            Record::new("Note").with_property("body", "skipped"),
            Record::new("Note").with_property("pages", 3),
            Record::new("Note").with_property("body", "past the mask end"),
        ];

        let pending = pending_items(
            &records,
            &[false, true],
            &ClassConfig::new(),
            &PropertyRenderer,
            &WhitespaceEstimator,
        );
        assert_eq!(
            pending,
            vec![
                PendingItem::new(0, "one two", 2),
                PendingItem::new(3, "past the mask end", 4),
            ]
        );
    }

    #[test]
    fn test_drain() {
        let mut packer = Packer::new(items(&[1, 1, 1]));
        let _ = packer.next_batch(Ceiling::fixed(1), 100);
        let rest: Vec<usize> = packer.drain().map(|item| item.index).collect();
        assert_eq!(rest, vec![1, 2]);
        assert!(packer.is_empty());
    }
}
