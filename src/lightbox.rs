//! Lightbox navigation state machine.
//!
//! The lightbox is either closed (the gallery grid is interactive) or open
//! at a valid index into the item list. All index arithmetic lives here so
//! the event handlers stay thin and the whole machine can be exercised
//! without a window.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightboxState {
    Closed,
    Open { index: usize },
}

#[derive(Debug)]
pub struct Lightbox {
    len: usize,
    state: LightboxState,
}

impl Lightbox {
    /// A closed lightbox over `len` items. The item count is fixed for the
    /// lifetime of the machine.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            state: LightboxState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, LightboxState::Open { .. })
    }

    /// Index of the item on display, or `None` while closed.
    pub fn current(&self) -> Option<usize> {
        match self.state {
            LightboxState::Open { index } => Some(index),
            LightboxState::Closed => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open at `index`. An out-of-range index (which includes every index
    /// when the item list is empty) leaves the state untouched.
    pub fn open(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.state = LightboxState::Open { index };
        true
    }

    /// Re-target an already open lightbox; same validation as [`open`].
    ///
    /// [`open`]: Lightbox::open
    pub fn jump_to(&mut self, index: usize) -> bool {
        self.open(index)
    }

    /// Close the lightbox. Idempotent.
    pub fn close(&mut self) {
        self.state = LightboxState::Closed;
    }

    /// Advance with wraparound. Returns the new index, or `None` while
    /// closed.
    pub fn next(&mut self) -> Option<usize> {
        self.step(true)
    }

    /// Go back with wraparound. Exact inverse of [`next`].
    ///
    /// [`next`]: Lightbox::next
    pub fn previous(&mut self) -> Option<usize> {
        self.step(false)
    }

    fn step(&mut self, forward: bool) -> Option<usize> {
        let index = self.current()?;
        // current() != None implies len >= 1
        let index = if forward {
            (index + 1) % self.len
        } else {
            (index + self.len - 1) % self.len
        };
        self.state = LightboxState::Open { index };
        Some(index)
    }

    /// 1-based position counter, e.g. `"2 / 7"`. `None` while closed.
    pub fn counter(&self) -> Option<String> {
        self.current()
            .map(|index| format!("{} / {}", index + 1, self.len))
    }

    /// Wraparound neighbors (previous, next) of the displayed item, for
    /// preloading. With a single item both neighbors are the item itself.
    pub fn neighbors(&self) -> Option<(usize, usize)> {
        let index = self.current()?;
        Some(((index + self.len - 1) % self.len, (index + 1) % self.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let lightbox = Lightbox::new(3);
        assert!(!lightbox.is_open());
        assert_eq!(lightbox.current(), None);
        assert_eq!(lightbox.counter(), None);
    }

    #[test]
    fn open_lands_on_every_valid_index() {
        for index in 0..5 {
            let mut lightbox = Lightbox::new(5);
            assert!(lightbox.open(index));
            assert!(lightbox.is_open());
            assert_eq!(lightbox.current(), Some(index));
        }
    }

    #[test]
    fn open_out_of_range_is_a_no_op() {
        let mut lightbox = Lightbox::new(3);
        assert!(!lightbox.open(3));
        assert!(!lightbox.is_open());

        lightbox.open(1);
        assert!(!lightbox.open(7));
        assert_eq!(lightbox.current(), Some(1));
    }

    #[test]
    fn open_on_empty_list_stays_closed() {
        let mut lightbox = Lightbox::new(0);
        assert!(!lightbox.open(0));
        assert!(!lightbox.is_open());
        assert_eq!(lightbox.next(), None);
        assert_eq!(lightbox.previous(), None);
    }

    #[test]
    fn close_is_idempotent() {
        let mut lightbox = Lightbox::new(3);
        lightbox.open(2);
        lightbox.close();
        assert!(!lightbox.is_open());
        lightbox.close();
        assert!(!lightbox.is_open());
        assert_eq!(lightbox.current(), None);
    }

    #[test]
    fn next_cycles_back_to_the_start() {
        let mut lightbox = Lightbox::new(4);
        lightbox.open(1);
        for _ in 0..4 {
            lightbox.next();
        }
        assert_eq!(lightbox.current(), Some(1));
    }

    #[test]
    fn previous_inverts_next() {
        for start in 0..3 {
            let mut lightbox = Lightbox::new(3);
            lightbox.open(start);
            lightbox.next();
            lightbox.previous();
            assert_eq!(lightbox.current(), Some(start));
        }
    }

    #[test]
    fn forward_walk_updates_the_counter() {
        let mut lightbox = Lightbox::new(3);
        lightbox.open(0);
        assert_eq!(lightbox.counter().as_deref(), Some("1 / 3"));
        assert_eq!(lightbox.next(), Some(1));
        assert_eq!(lightbox.counter().as_deref(), Some("2 / 3"));
        assert_eq!(lightbox.next(), Some(2));
        assert_eq!(lightbox.counter().as_deref(), Some("3 / 3"));
        assert_eq!(lightbox.next(), Some(0));
        assert_eq!(lightbox.counter().as_deref(), Some("1 / 3"));
    }

    #[test]
    fn backward_walk_wraps_to_the_end() {
        let mut lightbox = Lightbox::new(3);
        lightbox.open(1);
        assert_eq!(lightbox.previous(), Some(0));
        assert_eq!(lightbox.counter().as_deref(), Some("1 / 3"));
        assert_eq!(lightbox.previous(), Some(2));
        assert_eq!(lightbox.counter().as_deref(), Some("3 / 3"));
    }

    #[test]
    fn jump_to_first_and_last() {
        let mut lightbox = Lightbox::new(3);
        lightbox.open(0);
        assert!(lightbox.jump_to(0));
        assert_eq!(lightbox.current(), Some(0));

        lightbox.jump_to(2);
        assert_eq!(lightbox.current(), Some(2));
        assert!(lightbox.jump_to(lightbox.len() - 1));
        assert_eq!(lightbox.current(), Some(2));
    }

    #[test]
    fn navigation_while_closed_is_a_no_op() {
        let mut lightbox = Lightbox::new(3);
        assert_eq!(lightbox.next(), None);
        assert_eq!(lightbox.previous(), None);
        assert!(!lightbox.is_open());
    }

    #[test]
    fn neighbors_wrap_around() {
        let mut lightbox = Lightbox::new(4);
        lightbox.open(0);
        assert_eq!(lightbox.neighbors(), Some((3, 1)));
        lightbox.jump_to(3);
        assert_eq!(lightbox.neighbors(), Some((2, 0)));
    }

    #[test]
    fn single_item_neighbors_are_the_item() {
        let mut lightbox = Lightbox::new(1);
        lightbox.open(0);
        assert_eq!(lightbox.neighbors(), Some((0, 0)));
        assert_eq!(lightbox.next(), Some(0));
        assert_eq!(lightbox.previous(), Some(0));
    }
}
