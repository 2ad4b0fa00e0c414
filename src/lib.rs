use std::cmp::Reverse;
use std::collections::VecDeque;

use bit_set::BitSet;
use instant::{Duration, Instant};
use itertools::Itertools;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given slot, based on its index in the Grid's `slots` field, which also
/// corresponds to an index in the fill struct's `domains` field.
pub type SlotId = usize;

/// An identifier for a given word, based on its index in the Grid's `words` field.
pub type WordId = usize;

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

/// A maximal run of at least two playable cells in one row or column of the grid. Two slots are
/// the same slot exactly when all four fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
    pub length: usize,
}

impl Slot {
    /// The grid coordinates of the cell at the given offset into this slot.
    pub fn cell(self, offset: usize) -> (usize, usize) {
        match self.direction {
            Direction::Across => (self.row, self.col + offset),
            Direction::Down => (self.row + offset, self.col),
        }
    }

    /// The coordinates of every cell covered by this slot, in offset order.
    pub fn cells(self) -> impl Iterator<Item = (usize, usize)> {
        (0..self.length).map(move |offset| self.cell(offset))
    }
}

/// A problem instance: the cell structure, the slots derived from it, the pairwise overlap table,
/// and the candidate word pool. Static during filling.
///
/// Slots are stored in derivation order (across slots in row-major scan order, then down slots in
/// column-major scan order), so every id-based iteration in the solver is deterministic. Words are
/// compared bytewise; candidate words are expected to be ASCII.
pub struct Grid {
    pub height: usize,
    pub width: usize,
    /// Per-cell playability, `height` rows of `width` entries.
    pub cells: Vec<Vec<bool>>,
    pub slots: Vec<Slot>,
    /// The candidate pool, deduplicated preserving first-occurrence order.
    pub words: Vec<String>,
    /// Both orientations of every crossing pair: `(x, y) -> (ia, ib)` means the word in `x` at
    /// offset `ia` must equal the word in `y` at offset `ib`.
    pub overlaps: FxHashMap<(SlotId, SlotId), (usize, usize)>,
    /// For each slot, the slots it crosses, in cell order.
    pub neighbors: Vec<SmallVec<[SlotId; MAX_SLOT_LENGTH]>>,
}

impl Grid {
    /// Build a grid from a boolean playability matrix and a word pool. Single-cell runs do not
    /// become slots. Panics on malformed geometry, since that means the caller handed us a broken
    /// structure rather than a merely unsolvable one.
    pub fn from_cells(cells: Vec<Vec<bool>>, word_list: &[String]) -> Grid {
        let height = cells.len();
        let width = cells.first().map_or(0, |row| row.len());
        if cells.iter().any(|row| row.len() != width) {
            panic!("Ragged rows in grid structure");
        }

        let words: Vec<String> = word_list.iter().cloned().unique().collect();

        let mut slots: Vec<Slot> = vec![];

        for row in 0..height {
            let mut run_start = None;
            for col in 0..=width {
                let playable = col < width && cells[row][col];
                if playable {
                    run_start.get_or_insert(col);
                } else if let Some(start) = run_start.take() {
                    if col - start >= 2 {
                        slots.push(Slot {
                            row,
                            col: start,
                            direction: Direction::Across,
                            length: col - start,
                        });
                    }
                }
            }
        }

        for col in 0..width {
            let mut run_start = None;
            for row in 0..=height {
                let playable = row < height && cells[row][col];
                if playable {
                    run_start.get_or_insert(row);
                } else if let Some(start) = run_start.take() {
                    if row - start >= 2 {
                        slots.push(Slot {
                            row: start,
                            col,
                            direction: Direction::Down,
                            length: row - start,
                        });
                    }
                }
            }
        }

        // Map each playable cell to the slots covering it, then read the overlap table and
        // neighbor lists off that map.
        let mut slots_by_cell: FxHashMap<(usize, usize), SmallVec<[(SlotId, usize); 2]>> =
            FxHashMap::default();

        for (slot_id, slot) in slots.iter().enumerate() {
            for (offset, cell) in slot.cells().enumerate() {
                slots_by_cell.entry(cell).or_default().push((slot_id, offset));
            }
        }

        let mut overlaps = FxHashMap::default();
        let mut neighbors: Vec<SmallVec<[SlotId; MAX_SLOT_LENGTH]>> =
            slots.iter().map(|_| SmallVec::new()).collect();

        for (slot_id, slot) in slots.iter().enumerate() {
            for (offset, cell) in slot.cells().enumerate() {
                let sharing = &slots_by_cell[&cell];
                if sharing.len() > 2 {
                    panic!("More than two slots crossing in cell {:?}?", cell);
                }

                for &(other_slot_id, other_offset) in sharing.iter() {
                    if other_slot_id == slot_id {
                        continue;
                    }
                    overlaps.insert((slot_id, other_slot_id), (offset, other_offset));
                    neighbors[slot_id].push(other_slot_id);
                }
            }
        }

        Grid {
            height,
            width,
            cells,
            slots,
            words,
            overlaps,
            neighbors,
        }
    }

    /// Build a grid from a string template, with `#` representing blocked cells and anything else
    /// representing playable cells.
    pub fn from_template(template: &str, word_list: &[String]) -> Grid {
        let cells: Vec<Vec<bool>> = template
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    None
                } else {
                    Some(line.chars().map(|c| c != '#').collect())
                }
            })
            .collect();

        Grid::from_cells(cells, word_list)
    }

    /// The overlap constraint between two slots, if they cross.
    pub fn overlap(&self, x: SlotId, y: SlotId) -> Option<(usize, usize)> {
        self.overlaps.get(&(x, y)).copied()
    }
}

/// A struct recording a slot assignment made during the filling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub slot_id: SlotId,
    pub word_id: WordId,
}

/// Turn the given grid and fill choices into a rendered string: `#` for blocked cells, `.` for
/// playable cells with no choice covering them, letters for filled cells.
pub fn render_grid(grid: &Grid, choices: &[Choice]) -> String {
    let mut rows: Vec<Vec<char>> = grid
        .cells
        .iter()
        .map(|row| {
            row.iter()
                .map(|&playable| if playable { '.' } else { '#' })
                .collect()
        })
        .collect();

    for &Choice { slot_id, word_id } in choices {
        let slot = grid.slots[slot_id];
        for (offset, c) in grid.words[word_id].chars().enumerate() {
            let (row, col) = slot.cell(offset);
            rows[row][col] = c;
        }
    }

    rows.into_iter()
        .map(|row| row.into_iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A struct tracking statistics about the filling process.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub node_limit: Option<u64>,
    /// Number of `backtrack` entries, counting the initial one.
    pub states: u64,
    /// Number of tentative choices that were undone.
    pub backtracks: u64,
    pub duration: Duration,
}

/// A struct representing the results of a fill operation. `choices` covers every slot and is
/// sorted by slot id.
#[derive(Debug)]
pub struct FillSuccess {
    pub statistics: Statistics,
    pub choices: Vec<Choice>,
}

/// Failure is an ordinary outcome here, not an error: either the instance has no solution at all,
/// or the caller's node budget ran out before the search finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillFailure {
    Unsolvable,
    ExhaustedNodeLimit,
}

/// The live state of a single solve attempt: one shrinking domain per slot, plus counters. The
/// domains only ever lose words, so a fresh `Fill` is built per attempt.
struct Fill<'a> {
    grid: &'a Grid,
    domains: Vec<Vec<WordId>>,
    statistics: Statistics,
}

impl<'a> Fill<'a> {
    fn new(grid: &'a Grid, node_limit: Option<u64>) -> Fill<'a> {
        Fill {
            grid,
            domains: grid
                .slots
                .iter()
                .map(|_| (0..grid.words.len()).collect())
                .collect(),
            statistics: Statistics {
                node_limit,
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }

    /// Drop every word whose length doesn't match its slot. Idempotent; a second call removes
    /// nothing.
    fn enforce_node_consistency(&mut self) {
        for (slot_id, slot) in self.grid.slots.iter().enumerate() {
            let words = &self.grid.words;
            self.domains[slot_id].retain(|&word_id| words[word_id].len() == slot.length);
        }
    }

    /// Make slot `x` arc-consistent with slot `y` by removing every word in `x`'s domain that has
    /// no supporting word in `y`'s domain at the overlap offsets. Returns whether the domain
    /// actually shrank; a pair with no overlap is a no-op.
    fn revise(&mut self, x: SlotId, y: SlotId) -> bool {
        let (ia, ib) = match self.grid.overlap(x, y) {
            Some(offsets) => offsets,
            None => return false,
        };

        let mut domain_x = std::mem::take(&mut self.domains[x]);
        let len_before = domain_x.len();

        domain_x.retain(|&word_x| {
            let glyph = self.grid.words[word_x].as_bytes()[ia];
            self.domains[y]
                .iter()
                .any(|&word_y| self.grid.words[word_y].as_bytes()[ib] == glyph)
        });

        let revised = domain_x.len() != len_before;
        self.domains[x] = domain_x;
        revised
    }

    /// Run the AC-3 work queue to a fixed point, starting from the given arcs or, if `None`, from
    /// every crossing pair in the grid. Returns false as soon as any domain is driven empty,
    /// meaning the instance has no solution under the current domains.
    ///
    /// Whenever `revise` shrinks `domain[x]`, every incoming arc `(z, x)` other than the one just
    /// processed has to be re-queued: the words removed from `x` may have been the only support
    /// for words in `z`. Skipping that re-queue leaves the grid only locally consistent.
    fn ac3(&mut self, initial_arcs: Option<Vec<(SlotId, SlotId)>>) -> bool {
        let mut queue: VecDeque<(SlotId, SlotId)> = match initial_arcs {
            Some(arcs) => arcs.into_iter().collect(),
            None => {
                let mut arcs = VecDeque::new();
                for x in 0..self.grid.slots.len() {
                    for &y in &self.grid.neighbors[x] {
                        arcs.push_back((x, y));
                    }
                }
                arcs
            }
        };

        while let Some((x, y)) = queue.pop_front() {
            if self.revise(x, y) {
                if self.domains[x].is_empty() {
                    return false;
                }

                for &z in &self.grid.neighbors[x] {
                    if z != y && !queue.contains(&(z, x)) {
                        queue.push_back((z, x));
                    }
                }
            }
        }

        true
    }

    /// Whether the partial assignment violates any constraint: a word used twice, a word whose
    /// length doesn't match its slot, or two crossing slots that disagree on their shared cell.
    fn consistent(&self, assignment: &FxHashMap<SlotId, WordId>) -> bool {
        let mut used_words = BitSet::with_capacity(self.grid.words.len());

        for (&slot_id, &word_id) in assignment {
            if !used_words.insert(word_id) {
                return false;
            }

            let word = self.grid.words[word_id].as_bytes();
            if word.len() != self.grid.slots[slot_id].length {
                return false;
            }

            for &neighbor in &self.grid.neighbors[slot_id] {
                if let Some(&neighbor_word_id) = assignment.get(&neighbor) {
                    let (ia, ib) = self.grid.overlaps[&(slot_id, neighbor)];
                    if word[ia] != self.grid.words[neighbor_word_id].as_bytes()[ib] {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Choose the unassigned slot to fill next: smallest remaining domain, then most crossings
    /// with other slots, then lowest id. The id iteration order makes ties deterministic.
    fn select_unassigned_slot(&self, assignment: &FxHashMap<SlotId, WordId>) -> SlotId {
        (0..self.grid.slots.len())
            .filter(|slot_id| !assignment.contains_key(slot_id))
            .min_by_key(|&slot_id| {
                (
                    self.domains[slot_id].len(),
                    Reverse(self.grid.neighbors[slot_id].len()),
                )
            })
            .expect("select_unassigned_slot called on a complete assignment?")
    }

    /// Order the slot's candidates least-constraining first: for each candidate, count how many
    /// words it would rule out across the domains of the slot's unassigned neighbors, and sort
    /// ascending. The sort is stable, so equally constraining words keep their domain order. A
    /// slot with no unassigned neighbors keeps its domain order outright.
    fn order_domain_values(
        &self,
        slot_id: SlotId,
        assignment: &FxHashMap<SlotId, WordId>,
    ) -> Vec<WordId> {
        let mut ordered = self.domains[slot_id].clone();

        let unassigned_neighbors: SmallVec<[SlotId; MAX_SLOT_LENGTH]> = self.grid.neighbors
            [slot_id]
            .iter()
            .copied()
            .filter(|neighbor| !assignment.contains_key(neighbor))
            .collect();

        if unassigned_neighbors.is_empty() {
            return ordered;
        }

        ordered.sort_by_cached_key(|&word_id| {
            let word = self.grid.words[word_id].as_bytes();
            let mut eliminated: u64 = 0;

            for &neighbor in &unassigned_neighbors {
                let (ia, ib) = self.grid.overlaps[&(slot_id, neighbor)];
                let glyph = word[ia];

                eliminated += self.domains[neighbor]
                    .iter()
                    .filter(|&&neighbor_word| {
                        self.grid.words[neighbor_word].as_bytes()[ib] != glyph
                    })
                    .count() as u64;
            }

            eliminated
        });

        ordered
    }

    /// Depth-first search over partial assignments. Each tentative choice is written into the one
    /// shared assignment and removed again before the next candidate is tried, so the map always
    /// reflects exactly the current search path. A node-limit expiry propagates straight up; only
    /// `Unsolvable` results make us try the next candidate.
    fn backtrack(&mut self, assignment: &mut FxHashMap<SlotId, WordId>) -> Result<(), FillFailure> {
        if let Some(node_limit) = self.statistics.node_limit {
            if self.statistics.states >= node_limit {
                return Err(FillFailure::ExhaustedNodeLimit);
            }
        }
        self.statistics.states += 1;

        if assignment.len() == self.grid.slots.len() {
            return Ok(());
        }

        let slot_id = self.select_unassigned_slot(assignment);

        for word_id in self.order_domain_values(slot_id, assignment) {
            assignment.insert(slot_id, word_id);

            if self.consistent(assignment) {
                match self.backtrack(assignment) {
                    Ok(()) => return Ok(()),
                    Err(FillFailure::ExhaustedNodeLimit) => {
                        assignment.remove(&slot_id);
                        return Err(FillFailure::ExhaustedNodeLimit);
                    }
                    Err(FillFailure::Unsolvable) => {}
                }
            }

            assignment.remove(&slot_id);
            self.statistics.backtracks += 1;
        }

        Err(FillFailure::Unsolvable)
    }
}

/// Search for a valid fill for the given grid, giving up once `backtrack` has been entered
/// `node_limit` times. Node consistency and a full arc-consistency pass run first; if propagation
/// alone empties a domain, the instance is reported unsolvable without any search.
pub fn find_fill_with_node_limit(
    grid: &Grid,
    node_limit: Option<u64>,
) -> Result<FillSuccess, FillFailure> {
    let start = Instant::now();

    let mut fill = Fill::new(grid, node_limit);
    fill.enforce_node_consistency();
    if !fill.ac3(None) {
        return Err(FillFailure::Unsolvable);
    }

    let mut assignment: FxHashMap<SlotId, WordId> = FxHashMap::default();
    fill.backtrack(&mut assignment)?;

    debug_assert!(fill.consistent(&assignment));

    fill.statistics.duration = start.elapsed();

    let mut choices: Vec<Choice> = assignment
        .into_iter()
        .map(|(slot_id, word_id)| Choice { slot_id, word_id })
        .collect();
    choices.sort_by_key(|choice| choice.slot_id);

    Ok(FillSuccess {
        statistics: fill.statistics,
        choices,
    })
}

/// Search for a valid fill for the given grid with no node budget.
pub fn find_fill(grid: &Grid) -> Result<FillSuccess, FillFailure> {
    find_fill_with_node_limit(grid, None)
}
