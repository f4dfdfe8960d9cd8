// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use crate::coroutine::{CoroutineId, Payload};
use crate::error::CoroResult;
use crate::scheduler;

/// Per-coroutine spawn configuration. The stack size is fixed per-thread at
/// `configure` time (spec.md §4.2); `Builder` only lets a spawn request the
/// thread's current size back (for self-documenting call sites) or attach a
/// name used in logging.
///
/// ```ignore
/// let id = Builder::new().name("worker 1".into())
///                         .spawn(|input| input)?;
/// ```
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            name: None,
            stack_size: None,
        }
    }

    /// Name the coroutine-to-be. Used for identification in log messages.
    pub fn name(mut self, name: String) -> Builder {
        self.name = Some(name);
        self
    }

    /// State the stack size this spawn expects. Must match the thread's
    /// configured size; mismatches fail with
    /// [`crate::error::CoroError::StackSizeMismatch`] rather than silently
    /// picking one or the other.
    pub fn stack_size(mut self, size: usize) -> Builder {
        self.stack_size = Some(size);
        self
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Option<usize>) {
        (self.name, self.stack_size)
    }

    /// Spawn a new coroutine and return its handle.
    pub fn spawn<F>(self, entry: F) -> CoroResult<CoroutineId>
    where
        F: FnOnce(Payload) -> Payload + 'static,
    {
        scheduler::create(self, entry)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}
