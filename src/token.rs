use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    sync::Arc,
};

use http::HeaderValue;

use crate::cfg::{ConfigError, TokenSource};

/// The full ordered token sequence for one dispatch.
///
/// Tokens are parsed into header values once, at load time, so the request
/// loop never re-validates them.
#[derive(Debug, Clone)]
pub struct TokenSupply {
    tokens: Arc<Vec<HeaderValue>>,
}

impl TokenSupply {
    pub fn load(source: &TokenSource) -> Result<Self, ConfigError> {
        let raw = match source {
            TokenSource::File(path) => read_lines(path)
                .map_err(|_| ConfigError::TokenFileMissing(path.display().to_string()))?,
            TokenSource::Inline(tokens) => tokens.clone(),
        };

        let mut tokens = Vec::with_capacity(raw.len());
        for (idx, token) in raw.iter().enumerate() {
            let value = HeaderValue::from_str(token).map_err(|_| ConfigError::InvalidToken(idx + 1))?;
            tokens.push(value);
        }

        Ok(Self { tokens: Arc::new(tokens) })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.tokens.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Cuts the sequence into disjoint contiguous slices matching the given
    /// per-worker budgets.
    ///
    /// The caller guarantees `budgets` sums to at most `len`.
    pub fn partition(&self, budgets: &[u64]) -> Vec<TokenSlice> {
        let mut slices = Vec::with_capacity(budgets.len());
        let mut offset = 0;

        for &budget in budgets {
            let end = offset + budget as usize;
            slices.push(TokenSlice {
                tokens: self.tokens.clone(),
                next: offset,
                end,
            });
            offset = end;
        }

        slices
    }
}

/// One worker's contiguous view into the token sequence.
///
/// Yields each token exactly once, in order.
#[derive(Debug)]
pub struct TokenSlice {
    tokens: Arc<Vec<HeaderValue>>,
    next: usize,
    end: usize,
}

impl TokenSlice {
    /// Returns the next unconsumed token, or None once the slice is spent.
    #[inline]
    pub fn next(&mut self) -> Option<&HeaderValue> {
        if self.next == self.end {
            return None;
        }

        let token = &self.tokens[self.next];
        self.next += 1;

        Some(token)
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.end - self.next
    }
}

fn read_lines(path: &std::path::Path) -> io::Result<Vec<String>> {
    let file = File::open(path)?;

    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.is_empty() {
            lines.push(line);
        }
    }

    Ok(lines)
}
