//! # Sequence Paginator
//!
//! Pages over an in-memory sequence of scored entries, highest score first.
//! Entries with equal scores are ordered by their tie-break keys, so the
//! sequence is total and a `(value, offset)` cursor always names the same
//! position while the data is unchanged.
//!
//! Position of a cursor = number of entries scored strictly above `value`,
//! plus `offset`. A forward cursor yields `[pos, pos + limit)`, a previous
//! cursor yields `[pos - limit, pos)`.

use serde::Serialize;
use std::cmp::Ordering;

use crate::cursor::{Cursor, CursorValue};

/// One scored entry.
#[derive(Debug, Clone)]
pub struct SequenceEntry<T> {
    pub score: CursorValue,
    /// Secondary keys compared after `score`, all descending. The last one
    /// must be unique per entry.
    pub tie_break: Vec<CursorValue>,
    pub item: T,
}

impl<T> SequenceEntry<T> {
    pub fn new(score: CursorValue, tie_break: Vec<CursorValue>, item: T) -> Self {
        Self {
            score,
            tie_break,
            item,
        }
    }

    /// Descending order: `Less` means `self` comes first.
    pub fn order(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| other.tie_break.cmp(&self.tie_break))
    }
}

/// One page of results plus the cursors around it.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub prev: Cursor,
    pub next: Cursor,
    pub has_prev: bool,
    pub has_more: bool,
    pub hits: Option<u64>,
    pub max_hits: Option<u64>,
}

impl<T> CursorPage<T> {
    /// A page with nothing in it. Cursors point back at `cursor` (or the
    /// start) so clients holding them stay valid.
    pub fn empty(cursor: Option<&Cursor>, count_hits: bool) -> Self {
        let (value, offset) = cursor
            .map(|c| (c.value.clone(), c.offset))
            .unwrap_or((CursorValue::Int(0), 0));
        Self {
            items: Vec::new(),
            prev: Cursor::new(value.clone(), offset, true),
            next: Cursor::new(value, offset, false),
            has_prev: false,
            has_more: false,
            hits: count_hits.then_some(0),
            max_hits: None,
        }
    }

    /// Replace the items, keeping cursors and hit counts.
    pub fn with_items<U>(self, items: Vec<U>) -> CursorPage<U> {
        CursorPage {
            items,
            prev: self.prev,
            next: self.next,
            has_prev: self.has_prev,
            has_more: self.has_more,
            hits: self.hits,
            max_hits: self.max_hits,
        }
    }
}

pub struct SequencePaginator<T> {
    entries: Vec<SequenceEntry<T>>,
}

impl<T: Clone> SequencePaginator<T> {
    /// Sort `entries` into their total order. Input order is irrelevant.
    pub fn new(mut entries: Vec<SequenceEntry<T>>) -> Self {
        entries.sort_by(|a, b| a.order(b));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first entry within `[0, hi)` whose score is `<= value`.
    fn first_at_or_below(&self, value: &CursorValue, hi: usize) -> usize {
        self.entries[..hi].partition_point(|e| e.score > *value)
    }

    /// Cut the page named by `cursor`.
    ///
    /// `known_hits` overrides the sequence length as the hit count (for
    /// sequences cut short by a row budget). Hits are reported only when
    /// `count_hits` is set and are capped at `max_hits`.
    pub fn page(
        &self,
        limit: usize,
        cursor: Option<&Cursor>,
        count_hits: bool,
        known_hits: Option<u64>,
        max_hits: Option<u64>,
    ) -> CursorPage<T> {
        let len = self.entries.len();
        let is_prev = cursor.map(|c| c.is_prev).unwrap_or(false);
        let position = match cursor {
            None => 0,
            Some(c) => self
                .first_at_or_below(&c.value, len)
                .saturating_add(c.offset),
        };

        let (lo, hi) = if is_prev {
            let hi = position.min(len);
            (hi.saturating_sub(limit), hi)
        } else {
            let lo = position.min(len);
            (lo, lo.saturating_add(limit).min(len))
        };

        let hits = count_hits.then(|| {
            let total = known_hits.unwrap_or(len as u64);
            max_hits.map_or(total, |max| total.min(max))
        });

        if self.entries.is_empty() {
            let mut page = CursorPage::empty(cursor, count_hits);
            page.hits = hits;
            page.max_hits = hits.and(max_hits);
            return page;
        }

        let prev_score = self.entries[lo.min(len - 1)].score.clone();
        let prev_offset = lo - self.first_at_or_below(&prev_score, lo);
        let next_score = self.entries[hi.min(len - 1)].score.clone();
        let next_offset = hi - self.first_at_or_below(&next_score, hi);

        CursorPage {
            items: self.entries[lo..hi].iter().map(|e| e.item.clone()).collect(),
            prev: Cursor::new(prev_score, prev_offset, true),
            next: Cursor::new(next_score, next_offset, false),
            has_prev: lo > 0,
            has_more: hi < len,
            hits,
            max_hits: hits.and(max_hits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(scores: &[(i64, u64)]) -> Vec<SequenceEntry<u64>> {
        scores
            .iter()
            .map(|(score, id)| {
                SequenceEntry::new(
                    CursorValue::Int(*score),
                    vec![CursorValue::Int(*id as i64)],
                    *id,
                )
            })
            .collect()
    }

    fn walk_forward(p: &SequencePaginator<u64>, limit: usize) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = p.page(limit, cursor.as_ref(), false, None, None);
            out.extend(page.items.iter().copied());
            if !page.has_more {
                return out;
            }
            cursor = Some(page.next);
        }
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = SequencePaginator::new(entries(&[(3, 1), (5, 2), (3, 3), (1, 4)]));
        let b = SequencePaginator::new(entries(&[(1, 4), (3, 3), (3, 1), (5, 2)]));
        let pa = a.page(10, None, false, None, None);
        let pb = b.page(10, None, false, None, None);
        assert_eq!(pa.items, vec![2, 3, 1, 4]);
        assert_eq!(pa.items, pb.items);
        assert_eq!(pa.next, pb.next);
    }

    #[test]
    fn test_forward_walk_over_ties_skips_and_repeats_nothing() {
        let p = SequencePaginator::new(entries(&[
            (9, 1),
            (7, 2),
            (7, 3),
            (7, 4),
            (7, 5),
            (7, 6),
            (4, 7),
            (4, 8),
            (1, 9),
        ]));
        let all = p.page(100, None, false, None, None).items;
        for limit in 1..=4 {
            assert_eq!(walk_forward(&p, limit), all, "limit {}", limit);
        }
    }

    #[test]
    fn test_prev_cursor_returns_previous_page() {
        let p = SequencePaginator::new(entries(&[
            (9, 1),
            (7, 2),
            (7, 3),
            (7, 4),
            (4, 5),
            (4, 6),
            (1, 7),
        ]));
        let first = p.page(3, None, false, None, None);
        let second = p.page(3, Some(&first.next), false, None, None);
        let third = p.page(3, Some(&second.next), false, None, None);
        assert_eq!(third.items, vec![7]);
        assert!(!third.has_more);

        let back = p.page(3, Some(&third.prev), false, None, None);
        assert_eq!(back.items, second.items);
        let back_again = p.page(3, Some(&back.prev), false, None, None);
        assert_eq!(back_again.items, first.items);
        assert!(!back_again.has_prev);
    }

    #[test]
    fn test_hits_respect_known_total_and_cap() {
        let p = SequencePaginator::new(entries(&[(3, 1), (2, 2), (1, 3)]));
        assert_eq!(p.page(1, None, true, None, None).hits, Some(3));
        assert_eq!(p.page(1, None, true, Some(50), None).hits, Some(50));
        let capped = p.page(1, None, true, Some(50), Some(10));
        assert_eq!(capped.hits, Some(10));
        assert_eq!(capped.max_hits, Some(10));
        assert_eq!(p.page(1, None, false, Some(50), None).hits, None);
    }

    #[test]
    fn test_cursor_past_the_end_is_an_empty_page() {
        let p = SequencePaginator::new(entries(&[(3, 1), (2, 2)]));
        let page = p.page(5, Some(&Cursor::new(2i64, 40, false)), false, None, None);
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert!(page.has_prev);
    }

    #[test]
    fn test_empty_sequence() {
        let p: SequencePaginator<u64> = SequencePaginator::new(Vec::new());
        let page = p.page(5, None, true, None, None);
        assert!(page.items.is_empty());
        assert_eq!(page.hits, Some(0));
        assert!(!page.has_more && !page.has_prev);
    }
}
