use prelude::flame::{self, Span};
use prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};

/// All calls of one span name under the same parent.
#[derive(Debug, PartialEq)]
pub struct MergedSpan {
    pub name: String,
    pub calls: usize,
    pub total_ns: u64,
    pub children: Vec<MergedSpan>,
}

/// Writes the spans of the main thread to `path` with repeated calls merged into one entry.
pub fn write_flame(path: &str) -> io::Result<()> {
    let merged = merge_spans(&flame::spans());
    let mut out = BufWriter::new(File::create(path)?);
    for span in &merged {
        write_span(&mut out, span, 0)?;
    }
    out.flush()
}

/// Merges spans by name, slowest first.
pub fn merge_spans<'a, I>(spans: I) -> Vec<MergedSpan>
where
    I: IntoIterator<Item = &'a Span>,
{
    let mut groups: Vec<(&'a str, Vec<&'a Span>)> = Vec::new();
    for span in spans {
        match groups.iter_mut().find(|(name, _)| *name == span.name) {
            Some((_, group)) => group.push(span),
            None => groups.push((&*span.name, vec![span])),
        }
    }

    let mut merged: Vec<MergedSpan> = groups
        .into_iter()
        .map(|(name, group)| MergedSpan {
            name: name.to_string(),
            calls: group.len(),
            total_ns: group.iter().map(|s| s.delta).sum(),
            children: merge_spans(
                group
                    .iter()
                    .flat_map(|s| s.children.iter())
                    .collect::<Vec<&Span>>(),
            ),
        })
        .collect();
    merged.sort_by(|a, b| b.total_ns.cmp(&a.total_ns));
    merged
}

fn write_span<W: Write>(out: &mut W, span: &MergedSpan, depth: usize) -> io::Result<()> {
    let millis = span.total_ns as float / 1e6;
    writeln!(
        out,
        "{:indent$}| {}: {:.3} ms in {} calls",
        "",
        span.name,
        millis,
        span.calls,
        indent = 2 * depth
    )?;

    if !span.children.is_empty() {
        let child_ns: u64 = span.children.iter().map(|c| c.total_ns).sum();
        for child in &span.children {
            write_span(out, child, depth + 1)?;
        }
        // Time not covered by any child
        let own_millis = span.total_ns.saturating_sub(child_ns) as float / 1e6;
        writeln!(out, "{:indent$}+ {:.3} ms", "", own_millis, indent = 2 * (depth + 1))?;
    }
    Ok(())
}
