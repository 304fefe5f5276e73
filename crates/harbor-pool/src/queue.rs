use std::collections::VecDeque;

use anyhow::Error;

/// Work submitted to the pool.
pub type Job<T> = Box<dyn FnOnce(&mut T) -> Result<(), Error> + Send>;

/// A job together with the item it operates on.
pub(crate) struct Task<T> {
    pub job: Job<T>,
    pub item: T,
}

/// FIFO of pending tasks.
///
/// Not synchronized on its own, it lives inside the pool state and is only touched under the
/// pool lock.
pub(crate) struct TaskQueue<T> {
    tasks: VecDeque<Task<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    pub fn push(&mut self, task: Task<T>) {
        self.tasks.push_back(task);
    }

    pub fn pop(&mut self) -> Option<Task<T>> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}
