/// Document tooling: `promtail-config fmt` and `promtail-config validate`.
///
/// Formatting re-renders a persisted document in canonical form: records
/// sorted by key, blank lines dropped, the file's own header kept.
use std::io::IsTerminal;
use std::process;

use promtail_config_lib::document::{DocumentCodec, SCRAPE_CONFIGS_LINE};
use promtail_config_lib::Snippets;

/// Public entry point for the `fmt` subcommand.
pub fn run_fmt(path: &str, check: bool, diff: bool) {
    if run_fmt_inner(path, check, diff).is_err() {
        process::exit(1);
    }
}

/// Public entry point for the `validate` subcommand.
pub fn run_validate(path: &str) {
    if run_validate_inner(path).is_err() {
        process::exit(1);
    }
}

/// Inner logic returning `Result<(), ()>`; errors are printed here.
pub fn run_fmt_inner(path: &str, check: bool, diff: bool) -> Result<(), ()> {
    let content = read(path)?;

    let formatted = match format_document(&content) {
        Ok(formatted) => formatted,
        Err(e) => {
            eprintln!("Parsing failed: {}", e);
            return Err(());
        }
    };

    if check {
        if content == formatted {
            return Ok(());
        }
        let is_tty = std::io::stderr().is_terminal();
        if is_tty {
            eprintln!("\x1b[1;31mwould reformat:\x1b[0m {}", path);
        } else {
            eprintln!("would reformat: {}", path);
        }
        return Err(());
    }

    if diff {
        print_diff(&content, &formatted, path);
        return Ok(());
    }

    if content == formatted {
        println!("already formatted: {}", path);
    } else {
        match std::fs::write(path, &formatted) {
            Ok(_) => println!("formatted: {}", path),
            Err(e) => {
                eprintln!("Failed to write {}: {}", path, e);
                return Err(());
            }
        }
    }

    Ok(())
}

pub fn run_validate_inner(path: &str) -> Result<(), ()> {
    let content = read(path)?;

    let snippets = match DocumentCodec::default().parse(&content) {
        Ok(snippets) => snippets,
        Err(e) => {
            eprintln!("Parsing failed: {}", e);
            return Err(());
        }
    };

    for (key, snippet) in sorted(&snippets) {
        println!("{} ({} lines)", key, snippet.lines().count());
    }
    println!("{}: {} records", path, snippets.len());
    Ok(())
}

fn read(path: &str) -> Result<String, ()> {
    std::fs::read_to_string(path).map_err(|_| {
        eprintln!("{} does not exist", path);
    })
}

/// Parses `content` and renders it again under its own header.
pub fn format_document(content: &str) -> promtail_config_lib::Result<String> {
    let header = header_of(content).ok_or_else(|| {
        promtail_config_lib::Error::malformed(
            content.lines().count(),
            format!("no '{}' line found", SCRAPE_CONFIGS_LINE),
        )
    })?;
    let codec = DocumentCodec::with_header(&header)?;
    let snippets = codec.parse(content)?;
    Ok(codec.render(&snippets))
}

/// Everything up to and including the `scrape_configs:` line.
fn header_of(content: &str) -> Option<String> {
    let mut header = String::new();
    for line in content.lines() {
        header.push_str(line);
        header.push('\n');
        if line.trim_end() == SCRAPE_CONFIGS_LINE {
            return Some(header);
        }
    }
    None
}

fn sorted(snippets: &Snippets) -> Vec<(&promtail_config_lib::Key, &String)> {
    let mut entries: Vec<_> = snippets.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

/// Print a simple unified-style diff between the original and formatted text.
fn print_diff(original: &str, formatted: &str, path: &str) {
    let orig_lines: Vec<&str> = original.lines().collect();
    let fmt_lines: Vec<&str> = formatted.lines().collect();

    if orig_lines == fmt_lines {
        println!("no changes: {}", path);
        return;
    }

    println!("--- {}", path);
    println!("+++ {}", path);

    let ctx = 2;
    let max = orig_lines.len().max(fmt_lines.len());
    let same = |k: usize| k < orig_lines.len() && k < fmt_lines.len() && orig_lines[k] == fmt_lines[k];

    let mut i = 0;
    while i < max {
        if same(i) {
            i += 1;
            continue;
        }

        let hunk_start = i.saturating_sub(ctx);

        // A hunk ends once `ctx` lines in a row match again.
        let mut j = i;
        while j < max && !(j..(j + ctx).min(max)).all(same) {
            j += 1;
        }
        let hunk_end = (j + ctx).min(max);

        println!(
            "@@ -{},{} +{},{} @@",
            hunk_start + 1,
            hunk_end.min(orig_lines.len()).saturating_sub(hunk_start),
            hunk_start + 1,
            hunk_end.min(fmt_lines.len()).saturating_sub(hunk_start),
        );

        for k in hunk_start..hunk_end {
            match (orig_lines.get(k), fmt_lines.get(k)) {
                (Some(o), Some(f)) if o == f => println!(" {}", o),
                (Some(o), Some(f)) => {
                    println!("-{}", o);
                    println!("+{}", f);
                }
                (Some(o), None) => println!("-{}", o),
                (None, Some(f)) => println!("+{}", f),
                (None, None) => {}
            }
        }

        i = hunk_end;
    }
}
