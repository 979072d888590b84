//! Thread-safe FIFO of pending command invocations.

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};

use super::lock;
use super::tokenizer::{TokenizedLine, tokenize};

type Dispatcher = dyn Fn(&TokenizedLine) + Send + Sync;

/// Queue of invocations waiting to be dispatched.
///
/// Any thread may append. Dispatching runs the installed dispatcher on the
/// calling thread with the queue unlocked, so a dispatched command can queue
/// more commands.
#[derive(Default)]
pub struct CommandQueue {
    lines: Mutex<VecDeque<TokenizedLine>>,
    dispatcher: OnceLock<Box<Dispatcher>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the dispatch callback. Can only be done once.
    pub fn set_dispatcher<F>(&self, f: F) -> bool
    where
        F: Fn(&TokenizedLine) + Send + Sync + 'static,
    {
        let installed = self.dispatcher.set(Box::new(f)).is_ok();
        crate::afw_assert!(installed, "command queue dispatcher installed twice");
        installed
    }

    /// Append one invocation. Empty lines are ignored.
    pub fn append(&self, line: TokenizedLine) {
        if !line.is_empty() {
            lock(&self.lines).push_back(line);
        }
    }

    /// Append several invocations, keeping them contiguous.
    pub fn append_lines<I>(&self, lines: I)
    where
        I: IntoIterator<Item = TokenizedLine>,
    {
        let mut queue = lock(&self.lines);
        queue.extend(lines.into_iter().filter(|line| !line.is_empty()));
    }

    /// Tokenize `text` and append the result.
    pub fn append_parsed(&self, text: &str) {
        self.append_lines(tokenize(text));
    }

    /// Dispatch at most one invocation. Returns whether one was dispatched.
    pub fn step_once(&self) -> bool {
        let Some(dispatch) = self.dispatcher.get() else {
            return false;
        };

        let line = lock(&self.lines).pop_front();
        match line {
            Some(line) => {
                dispatch(&line);
                true
            }
            None => false,
        }
    }

    /// Dispatch every invocation present at the time of the call. Lines
    /// appended while draining stay queued for the next call.
    pub fn drain(&self) -> usize {
        let Some(dispatch) = self.dispatcher.get() else {
            return 0;
        };

        let count = self.count();
        let mut done = 0;
        while done < count {
            let Some(line) = lock(&self.lines).pop_front() else {
                break;
            };
            dispatch(&line);
            done += 1;
        }
        done
    }

    /// Number of queued invocations.
    pub fn count(&self) -> usize {
        lock(&self.lines).len()
    }

    pub fn clear(&self) {
        lock(&self.lines).clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn recording_queue() -> (Arc<CommandQueue>, Arc<Mutex<Vec<String>>>) {
        let queue = Arc::new(CommandQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        queue.set_dispatcher(move |line| sink.lock().unwrap().push(line.to_command_string()));
        (queue, seen)
    }

    #[test]
    fn test_fifo_order() {
        let (queue, seen) = recording_queue();
        queue.append_parsed("a; b 1; c");
        assert_eq!(queue.count(), 3);

        assert!(queue.step_once());
        assert_eq!(*seen.lock().unwrap(), [r#""a""#]);

        assert_eq!(queue.drain(), 2);
        assert_eq!(*seen.lock().unwrap(), [r#""a""#, r#""b" "1""#, r#""c""#]);
        assert!(!queue.step_once());
    }

    #[test]
    fn test_drain_leaves_new_lines() {
        let queue = Arc::new(CommandQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (q, sink) = (Arc::downgrade(&queue), seen.clone());
        queue.set_dispatcher(move |line| {
            let name = line.name().unwrap_or_default().to_string();
            if name == "requeue" {
                if let Some(q) = q.upgrade() {
                    q.append_parsed("later");
                }
            }
            sink.lock().unwrap().push(name);
        });

        queue.append_parsed("requeue; first");
        assert_eq!(queue.drain(), 2);
        assert_eq!(*seen.lock().unwrap(), ["requeue", "first"]);
        assert_eq!(queue.count(), 1);

        assert_eq!(queue.drain(), 1);
        assert_eq!(*seen.lock().unwrap(), ["requeue", "first", "later"]);
    }

    #[test]
    fn test_without_dispatcher_keeps_lines() {
        let queue = CommandQueue::new();
        queue.append(TokenizedLine::new(["x"]));
        queue.append(TokenizedLine::default());
        assert!(!queue.step_once());
        assert_eq!(queue.drain(), 0);
        assert_eq!(queue.count(), 1);

        queue.clear();
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn test_append_from_threads() {
        let (queue, seen) = recording_queue();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        queue.append(TokenizedLine::new([format!("t{t}"), i.to_string()]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(queue.drain(), 100);
        assert_eq!(seen.lock().unwrap().len(), 100);
    }
}
