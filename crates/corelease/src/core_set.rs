use crate::error::{LeaseError, Result};

const WORD_BITS: u32 = u64::BITS;

/// # CoreSet Module
///
/// This module provides the `CoreSet` struct, a bitmap over the host's core pool `0..total`.
/// A set bit marks a leased core, an unset bit a free one. The bitmap is stored as a vector
/// of 64-bit words, so hosts with any number of cores are supported.
///
/// ## Features
///
/// - Allocate a specified number of cores, lowest index first, all or nothing
/// - Free previously allocated cores
/// - Render and parse core lists in the Linux cpu-list format (`0-3,8`)
///
/// ## Examples
///
/// ### Allocating Cores
///
/// ```
/// use corelease::core_set::CoreSet;
///
/// let mut set = CoreSet::new(8);
/// set.insert(1);
/// set.insert(3);
///
/// // lowest free cores first, skipping leased ones
/// let allocation = set.allocate(3).unwrap();
/// assert_eq!(allocation, vec![0, 2, 4]);
/// assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
///
/// // not enough cores left: nothing is taken
/// assert!(set.allocate(4).is_none());
/// assert_eq!(set.len(), 5);
/// ```
///
/// ### Converting Core Lists
///
/// ```
/// use corelease::core_set::{format_cpu_list, parse_cpu_list};
///
/// assert_eq!(format_cpu_list(&[0, 1, 2, 3, 8, 10, 11]), "0-3,8,10-11");
/// assert_eq!(parse_cpu_list("0-3,8").unwrap(), vec![0, 1, 2, 3, 8]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSet {
    words: Vec<u64>,
    total_cores: u32,
}

impl CoreSet {
    pub fn new(total_cores: u32) -> Self {
        let words = total_cores.div_ceil(WORD_BITS) as usize;
        Self {
            words: vec![0; words],
            total_cores,
        }
    }

    /// Build a set from already validated core indices.
    pub fn with_cores<I: IntoIterator<Item = u32>>(total_cores: u32, cores: I) -> Self {
        let mut set = Self::new(total_cores);
        for core in cores {
            set.insert(core);
        }
        set
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    /// Whether `core` is part of the pool at all.
    pub fn in_pool(&self, core: u32) -> bool {
        core < self.total_cores
    }

    pub fn contains(&self, core: u32) -> bool {
        if !self.in_pool(core) {
            return false;
        }
        let (word, bit) = Self::position(core);
        self.words[word] & (1u64 << bit) != 0
    }

    /// Mark `core` as leased. Returns `false` if it already was or lies outside the pool.
    pub fn insert(&mut self, core: u32) -> bool {
        if !self.in_pool(core) || self.contains(core) {
            return false;
        }
        let (word, bit) = Self::position(core);
        self.words[word] |= 1u64 << bit;
        true
    }

    /// Mark `core` as free. Returns `false` if it was not leased.
    pub fn remove(&mut self, core: u32) -> bool {
        if !self.contains(core) {
            return false;
        }
        let (word, bit) = Self::position(core);
        self.words[word] &= !(1u64 << bit);
        true
    }

    pub fn free(&mut self, cores: &[u32]) {
        for &core in cores {
            self.remove(core);
        }
    }

    pub fn len(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn free_count(&self) -> u32 {
        self.total_cores - self.len()
    }

    /// Leased cores in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.total_cores).filter(move |&core| self.contains(core))
    }

    /// Free cores in ascending order.
    pub fn free_cores(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.total_cores).filter(move |&core| !self.contains(core))
    }

    /// The `cores_needed` lowest free cores, or `None` if fewer are free.
    pub fn lowest_free(&self, cores_needed: u32) -> Option<Vec<u32>> {
        let selection: Vec<u32> = self.free_cores().take(cores_needed as usize).collect();
        (selection.len() == cores_needed as usize).then_some(selection)
    }

    /// Lease the `cores_needed` lowest free cores. The set is left untouched on failure.
    pub fn allocate(&mut self, cores_needed: u32) -> Option<Vec<u32>> {
        if cores_needed == 0 {
            return None;
        }
        let selection = self.lowest_free(cores_needed)?;
        for &core in &selection {
            self.insert(core);
        }
        Some(selection)
    }

    fn position(core: u32) -> (usize, u32) {
        ((core / WORD_BITS) as usize, core % WORD_BITS)
    }
}

/// Plain comma separated rendering, e.g. `0,2,4`.
pub fn join_cores(cores: &[u32]) -> String {
    cores
        .iter()
        .map(|core| core.to_string())
        .collect::<Vec<String>>()
        .join(",")
}

/// Render cores in cpu-list format, collapsing consecutive runs into ranges.
///
/// The input is sorted first; duplicates collapse.
pub fn format_cpu_list(cores: &[u32]) -> String {
    let mut sorted = cores.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(",")
}

/// Parse a cpu-list such as `0-3,8`.
///
/// The order of the input is preserved and duplicates are kept, so callers can
/// reject them.
pub fn parse_cpu_list(list: &str) -> Result<Vec<u32>> {
    let list = list.trim();
    if list.is_empty() {
        return Err(LeaseError::InvalidRequest("empty cpu list".to_string()));
    }

    let parse_core = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| LeaseError::InvalidRequest(format!("invalid core index `{}`", s.trim())))
    };

    let mut cores = Vec::new();
    for part in list.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_core(start)?, parse_core(end)?);
                if start > end {
                    return Err(LeaseError::InvalidRequest(format!(
                        "descending core range `{}`",
                        part.trim()
                    )));
                }
                cores.extend(start..=end);
            }
            None => cores.push(parse_core(part)?),
        }
    }
    Ok(cores)
}
