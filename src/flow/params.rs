//! Path parameter extraction.
//!
//! # Responsibilities
//! - Locate `:name` segments of the matched HTTP selector template
//! - Copy the request path segments found at those positions into the context
//!
//! # Design Decisions
//! - Runs only against the selector that accepted the request
//! - Positions beyond the end of the request path are never reached and leave
//!   the parameter unset (STARTS_WITH selectors can under-extract)
//! - The final request segment runs to the end of the path

use crate::context::RequestContext;
use crate::flow::model::HttpSelector;

/// Writes path parameters of a matched selector into the request context.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathParameterExtractor;

impl PathParameterExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the parameters declared by `selector` from the request path info.
    pub fn extract(&self, ctx: &mut RequestContext, selector: Option<&HttpSelector>) {
        let Some(selector) = selector else {
            return;
        };
        if selector.path.is_empty() {
            return;
        }

        let params: Vec<(usize, &str)> = selector
            .path
            .split('/')
            .enumerate()
            .filter_map(|(index, segment)| segment.strip_prefix(':').map(|name| (index, name)))
            .filter(|(_, name)| !name.is_empty())
            .collect();
        if params.is_empty() {
            return;
        }

        let values = segments_at(ctx.path_info(), &params);
        for (name, value) in values {
            ctx.insert_path_parameter(name, value);
        }
    }
}

/// Values of the path segments at the requested positions, scanning separators once.
fn segments_at(path: &str, params: &[(usize, &str)]) -> Vec<(String, String)> {
    let mut values = Vec::with_capacity(params.len());
    let mut wanted = params.iter().peekable();
    let mut start = 0;
    let mut index = 0;

    while wanted.peek().is_some() {
        let separator = path[start..].find('/').map(|offset| start + offset);
        let end = separator.unwrap_or(path.len());

        while let Some((position, name)) = wanted.peek() {
            if *position != index {
                break;
            }
            values.push((name.to_string(), path[start..end].to_string()));
            wanted.next();
        }

        match separator {
            Some(separator) => {
                start = separator + 1;
                index += 1;
            }
            None => break,
        }
    }

    values
}
