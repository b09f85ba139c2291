use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::config::LeaderboardOptions;
use crate::error::DbError;

/// One ranked name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub target: f64,
    /// Caller data carried alongside the target
    pub extras: Map<String, Json>,
}

/// Where a pushed target would land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    At(usize),
    /// Board is full and the target ranks below every slot
    NoFit,
}

#[derive(Debug, Default)]
struct Board {
    entries: Vec<LeaderboardEntry>,
    least: f64,
    most: f64,
}

impl Board {
    fn refresh(&mut self) {
        if let (Some(first), Some(last)) = (self.entries.first(), self.entries.last()) {
            self.most = first.target;
            self.least = last.target;
        }
    }
}

/// Sorted, optionally bounded collection of `(name, target, extras)`.
///
/// A name appears at most once. Pushing a known name moves or replaces its
/// entry according to the board's options:
/// - `dup_push_above` places a newcomer above entries with an equal target
/// - `always_replace` lets a name move down, or drop to the end when its new
///   target no longer fits a full board
#[derive(Debug)]
pub struct Leaderboard {
    name: String,
    options: LeaderboardOptions,
    board: Mutex<Board>,
}

impl Leaderboard {
    pub fn new(name: &str, options: LeaderboardOptions) -> Result<Self, DbError> {
        if name.is_empty() {
            return Err(DbError::TableNameRequired);
        }
        Ok(Self {
            name: name.to_string(),
            options,
            board: Mutex::new(Board::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &LeaderboardOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.board.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest and highest targets currently ranked.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let board = self.board.lock();
        (!board.entries.is_empty()).then_some((board.least, board.most))
    }

    fn has_room(&self, len: usize) -> bool {
        self.options.max_entries == 0 || len < self.options.max_entries
    }

    fn placement(&self, board: &Board, target: f64) -> Placement {
        let entries = &board.entries;
        let len = entries.len();
        if target > board.most {
            return Placement::At(0);
        }
        if self.has_room(len) && target < board.least {
            return Placement::At(len);
        }

        let mut i = 0;
        while i < len {
            let current = entries[i].target;
            if target > current {
                return Placement::At(i);
            }
            if target == current {
                if self.options.dup_push_above {
                    return Placement::At(i);
                }
                while i < len && entries[i].target == target {
                    i += 1;
                }
                if i < len {
                    return Placement::At(i);
                }
                break;
            }
            i += 1;
        }

        if self.has_room(len) {
            Placement::At(len)
        } else {
            Placement::NoFit
        }
    }

    /// Ranks `name` with `target`.
    ///
    /// # Returns
    /// The entry's new position, or `None` when the board did not change.
    pub fn check_and_push(
        &self,
        name: &str,
        target: f64,
        extras: Map<String, Json>,
    ) -> Result<Option<usize>, DbError> {
        if target.is_nan() {
            return Err(DbError::InvalidLeaderboardArgument(format!(
                "target for '{}' is NaN",
                name
            )));
        }
        let entry = LeaderboardEntry {
            name: name.to_string(),
            target,
            extras,
        };

        let mut board = self.board.lock();
        if board.entries.is_empty() {
            board.entries.push(entry);
            board.least = target;
            board.most = target;
            return Ok(Some(0));
        }

        let previous = board
            .entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| (i, board.entries[i].target));

        let placed = match (self.placement(&board, target), previous) {
            (Placement::At(pos), None) => {
                board.entries.insert(pos, entry);
                if self.options.max_entries > 0 {
                    board.entries.truncate(self.options.max_entries);
                }
                Some(pos)
            }
            (Placement::At(pos), Some((prev, prev_target))) => {
                if prev > pos {
                    board.entries.remove(prev);
                    board.entries.insert(pos, entry);
                    Some(pos)
                } else if prev < pos && self.options.always_replace {
                    board.entries.remove(prev);
                    board.entries.insert(pos - 1, entry);
                    Some(pos - 1)
                } else if prev == pos && (prev_target < target || self.options.always_replace) {
                    board.entries[pos] = entry;
                    Some(pos)
                } else {
                    None
                }
            }
            (Placement::NoFit, Some((prev, _))) if self.options.always_replace => {
                board.entries.remove(prev);
                board.entries.push(entry);
                board.least = target;
                Some(board.entries.len() - 1)
            }
            (Placement::NoFit, _) => None,
        };

        if placed.is_some() {
            board.refresh();
        }
        Ok(placed)
    }

    /// Copies entries `page * limit .. (page + 1) * limit`, clamped to the
    /// board. Pages are zero-based.
    pub fn get_page(&self, limit: usize, page: usize) -> Vec<LeaderboardEntry> {
        let board = self.board.lock();
        let len = board.entries.len();
        let start = page.saturating_mul(limit).min(len);
        let end = start.saturating_add(limit).min(len);
        board.entries[start..end].to_vec()
    }

    /// Writes the board to stdout.
    pub fn print(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for Leaderboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let board = self.board.lock();
        let capacity = match self.options.max_entries {
            0 => "unbounded".to_string(),
            max => max.to_string(),
        };
        writeln!(f, "Leaderboard '{}' ({}/{})", self.name, board.entries.len(), capacity)?;
        for (rank, entry) in board.entries.iter().enumerate() {
            write!(f, "{:>4}. {:<20} {}", rank + 1, entry.name, entry.target)?;
            if !entry.extras.is_empty() {
                write!(f, "  {}", Json::Object(entry.extras.clone()))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
