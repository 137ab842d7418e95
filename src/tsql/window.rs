/// One-row lookahead over a row stream: each step yields the current row and
/// a peek at the following one.
pub struct Lookahead<I: Iterator> {
    iter: I,
    next: Option<I::Item>,
    started: bool,
}

impl<I: Iterator> Lookahead<I> {
    pub fn new(iter: I) -> Self {
        Self {
            iter,
            next: None,
            started: false,
        }
    }

    /// Moves one row forward. Returns the new current row and the row after it.
    pub fn advance(&mut self) -> Option<(I::Item, Option<&I::Item>)> {
        let current = if self.started {
            self.next.take()?
        } else {
            self.started = true;
            self.iter.next()?
        };
        self.next = self.iter.next();
        Some((current, self.next.as_ref()))
    }
}

/// The row being decoded plus its successor, as seen by lookahead functions.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a, R> {
    pub current: &'a R,
    pub next: Option<&'a R>,
}

impl<'a, R> Window<'a, R> {
    pub fn new(current: &'a R, next: Option<&'a R>) -> Self {
        Self { current, next }
    }

    pub fn single(current: &'a R) -> Self {
        Self { current, next: None }
    }
}

/// Windows over an in-memory slice, e.g. histogram buckets.
pub fn windows<R>(rows: &[R]) -> impl Iterator<Item = Window<'_, R>> {
    rows.iter()
        .enumerate()
        .map(move |(i, row)| Window::new(row, rows.get(i + 1)))
}
