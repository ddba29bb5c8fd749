//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

use std::sync::{Arc, Mutex};

/// A process-wide cap on how many of something may happen at once.
///
/// Clones share the same counter.
#[derive(Clone, Debug)]
pub struct Limiter {
    max: usize,
    active: Arc<Mutex<usize>>,
}

/// Releases its slot in the `Limiter` when dropped.
#[derive(Debug)]
pub struct LimiterGuard {
    active: Arc<Mutex<usize>>,
}

impl Limiter {
    pub fn new(max: usize) -> Self {
        Limiter {
            max,
            active: Arc::new(Mutex::new(0)),
        }
    }

    /// Take a slot, or return `None` if all are in use.
    pub fn try_acquire(&self) -> Option<LimiterGuard> {
        let mut active = self.active.lock().unwrap();
        if *active >= self.max {
            return None;
        }

        *active += 1;
        Some(LimiterGuard {
            active: Arc::clone(&self.active),
        })
    }

    pub fn active(&self) -> usize {
        *self.active.lock().unwrap()
    }
}

impl Drop for LimiterGuard {
    fn drop(&mut self) {
        *self.active.lock().unwrap() -= 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slots_are_released() {
        let limiter = Limiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let b = limiter.clone().try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(2, limiter.active());

        drop(a);
        let c = limiter.try_acquire().unwrap();
        drop(b);
        drop(c);
        assert_eq!(0, limiter.active());
    }

    #[test]
    fn zero_admits_nothing() {
        assert!(Limiter::new(0).try_acquire().is_none());
    }
}
