//! Stable k-way merge of record streams ordered by record id.
//!
//! Used by the consumer (aggregating ingest segments), the compactor (merging
//! store segments) and the query gather step. Each input keeps its internal
//! order; ties between inputs are broken by input position, so the merge never
//! reorders records that share an id and never drops duplicates.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::record::{RecordId, RecordLine, parse_records};

pub fn merge_by_key<T, K, F>(inputs: Vec<Vec<T>>, key: F) -> Vec<T>
where
    K: Ord + Clone,
    F: Fn(&T) -> K,
{
    let total: usize = inputs.iter().map(Vec::len).sum();
    let mut iters: Vec<std::vec::IntoIter<T>> = inputs.into_iter().map(Vec::into_iter).collect();
    let mut heads: Vec<Option<T>> = iters.iter_mut().map(Iterator::next).collect();

    let mut heap = BinaryHeap::with_capacity(heads.len());
    for (index, head) in heads.iter().enumerate() {
        if let Some(item) = head {
            heap.push(Reverse((key(item), index)));
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(Reverse((_, index))) = heap.pop() {
        if let Some(item) = heads[index].take() {
            merged.push(item);
        }
        heads[index] = iters[index].next();
        if let Some(item) = &heads[index] {
            heap.push(Reverse((key(item), index)));
        }
    }
    merged
}

/// Merge already-validated segment bodies into a single body.
pub fn merge_bodies(bodies: &[&[u8]]) -> Result<Vec<u8>, String> {
    let mut inputs: Vec<Vec<RecordLine<'_>>> = Vec::with_capacity(bodies.len());
    let mut size = 0;
    for body in bodies {
        inputs.push(parse_records(body)?);
        size += body.len();
    }

    let merged = merge_by_key(inputs, |record| record.id);
    let mut out = Vec::with_capacity(size);
    for record in merged {
        out.extend_from_slice(record.line);
        out.push(b'\n');
    }
    Ok(out)
}

/// Fold `incoming` into `held`, keeping one copy of each record id.
///
/// Returns the union body and how many records only `incoming` carried. Both
/// bodies must already be ordered by record id.
pub fn union_bodies(held: &[u8], incoming: &[u8]) -> Result<(Vec<u8>, usize), String> {
    fn tagged(body: &[u8], from_incoming: bool) -> Result<Vec<(RecordLine<'_>, bool)>, String> {
        Ok(parse_records(body)?
            .into_iter()
            .map(|record| (record, from_incoming))
            .collect())
    }
    let inputs = vec![tagged(held, false)?, tagged(incoming, true)?];

    let mut out = Vec::with_capacity(held.len().max(incoming.len()));
    let mut added = 0;
    let mut last = None;
    for (record, from_incoming) in merge_by_key(inputs, |(record, _)| record.id) {
        if last == Some(record.id) {
            continue;
        }
        last = Some(record.id);
        if from_incoming {
            added += 1;
        }
        out.extend_from_slice(record.line);
        out.push(b'\n');
    }
    Ok((out, added))
}

/// Smallest and largest record id in a body, or `None` when it holds no records.
pub fn id_range(records: &[RecordLine<'_>]) -> Option<(RecordId, RecordId)> {
    let low = records.iter().map(|r| r.id).min()?;
    let high = records.iter().map(|r| r.id).max()?;
    Some((low, high))
}
