use super::layout::{Layout, Location};

/// Result of peeling: cells listed in the order they were isolated, together
/// with the entry each cell resolves. Filling the cells in reverse order
/// guarantees that each just-filled cell is touched by no later entry.
///
/// The construction follows the peeling scheme of binary fuse filters:
/// - T. M. Graf, D. Lemire, *Binary Fuse Filters: Fast and Smaller Than Xor
///   Filters*, ACM Journal of Experimental Algorithmics 27, 2022,
///   <https://doi.org/10.1145/3510449>
pub(crate) struct PeelOrder {
    pub cell: Vec<u32>,
    pub entry: Vec<u32>,
}

/// Sorts `entries` by the first bucket of their location, which groups the
/// cells of nearby entries and keeps peeling cache-friendly.
pub(crate) fn sort_by_first_bucket(entries: &mut Vec<(Location, u32)>, layout: &Layout) {
    let mut offset = vec![0usize; layout.first_bucket_count() + 1];
    for (loc, _) in entries.iter() {
        offset[loc.first_bucket as usize + 1] += 1;
    }
    for i in 1..offset.len() {
        offset[i] += offset[i - 1];
    }
    let mut sorted = vec![(Location::default(), 0u32); entries.len()];
    for e in entries.drain(..) {
        let at = &mut offset[e.0.first_bucket as usize];
        sorted[*at] = e;
        *at += 1;
    }
    *entries = sorted;
}

/// Peels the 4-regular fuse graph of `entries` by repeatedly removing a cell
/// of degree one together with the only entry touching it.
///
/// Returns [`None`] if the graph contains a 2-core, i.e. some entries could
/// not be isolated; the caller then retries with fresh hashes.
pub(crate) fn peel(entries: &[(Location, u32)], total_pages: usize) -> Option<PeelOrder> {
    let mut degree = vec![0u32; total_pages];
    let mut xor_entry = vec![0u32; total_pages];
    for (i, (loc, _)) in entries.iter().enumerate() {
        for &page in &loc.pages {
            degree[page as usize] += 1;
            xor_entry[page as usize] ^= i as u32;
        }
    }

    let mut stack: Vec<u32> =
        (0..total_pages as u32).filter(|&page| degree[page as usize] == 1).collect();
    let mut order = PeelOrder {
        cell: Vec::with_capacity(entries.len()),
        entry: Vec::with_capacity(entries.len()),
    };
    while let Some(page) = stack.pop() {
        if degree[page as usize] == 0 { continue; }
        let entry = xor_entry[page as usize];
        order.cell.push(page);
        order.entry.push(entry);
        for &touched in &entries[entry as usize].0.pages {
            degree[touched as usize] -= 1;
            xor_entry[touched as usize] ^= entry;
            if degree[touched as usize] == 1 {
                stack.push(touched);
            }
        }
    }
    (order.cell.len() == entries.len()).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use butils::XorShift64;

    fn entries_for(hashes: &[u64], layout: &Layout) -> Vec<(Location, u32)> {
        let mut entries: Vec<_> = hashes.iter()
            .enumerate()
            .map(|(i, &h)| (layout.location(h), i as u32))
            .collect();
        sort_by_first_bucket(&mut entries, layout);
        entries
    }

    #[test]
    fn peeled_order_is_a_permutation() {
        let layout = Layout::new(1000, 1);
        let hashes: Vec<u64> = XorShift64(1234).take(1000).collect();
        let entries = entries_for(&hashes, &layout);
        let order = peel(&entries, layout.total_pages).expect("graph should peel");
        let mut seen = vec![false; entries.len()];
        for &e in &order.entry {
            assert!(!std::mem::replace(&mut seen[e as usize], true), "entry {e} peeled twice");
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn reverse_fill_touches_each_cell_last() {
        let layout = Layout::new(500, 2);
        let hashes: Vec<u64> = XorShift64(42).take(500).collect();
        let entries = entries_for(&hashes, &layout);
        let order = peel(&entries, layout.total_pages).expect("graph should peel");
        // the cell recorded at step i must not belong to any entry recorded later
        for (i, &cell) in order.cell.iter().enumerate() {
            for &later in &order.entry[i + 1..] {
                assert!(!entries[later as usize].0.pages.contains(&cell));
            }
        }
    }

    #[test]
    fn duplicate_hashes_do_not_peel() {
        let layout = Layout::new(4, 1);
        let entries = entries_for(&[7, 7, 13, 19], &layout);
        assert!(peel(&entries, layout.total_pages).is_none());
    }
}
