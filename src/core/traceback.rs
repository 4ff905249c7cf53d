//! Multi-language traceback parsing.
//!
//! Turns a raw error log into a [`ParsedTraceback`]: a detected language,
//! frames normalized to oldest-caller-first, and the error type/message.
//! Parsing never fails; an unrecognized log yields `Language::Unknown` and
//! an empty frame list.

use std::sync::LazyLock;

use regex::Regex;

use super::models::{Frame, Language, ParsedTraceback};

/// Keyword indicators used to score a log before the regex probes run.
static DETECTION_INDICATORS: &[(Language, &[&str])] = &[
    (
        Language::Python,
        &["Traceback (most recent call last):", "File \"", ".py\", line"],
    ),
    (
        Language::Java,
        &[".java:", "Exception", "Caused by:", "\tat "],
    ),
    (
        Language::Typescript,
        &[".ts:", ".tsx:", "TSError"],
    ),
    (
        Language::Javascript,
        &[".js:", "node_modules/", "    at ", "ReferenceError"],
    ),
    (
        Language::Go,
        &["goroutine", ".go:", "panic:", "runtime error:"],
    ),
    (
        Language::Rust,
        &["panicked at", ".rs:", "thread '", "RUST_BACKTRACE"],
    ),
];

static PY_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*File ["'](?P<file>[^"']+)["'], line (?P<line>\d+)(?:, in (?P<symbol>\S+))?"#)
        .unwrap()
});

static PY_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<etype>[A-Za-z_][\w.]*(?:Error|Exception|Warning|Interrupt|Exit)):\s*(?P<msg>.+)$")
        .unwrap()
});

static JS_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    // `at func (path:10:5)`, `at path:10:5`, `at async func (path:10:5)`
    Regex::new(
        r"(?m)^\s*at\s+(?:async\s+)?(?:(?P<symbol>[\w$.<>\[\]]+)\s+)?\(?(?P<file>[^()\s]+?):(?P<line>\d+):(?P<col>\d+)\)?\s*$",
    )
    .unwrap()
});

static JS_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:Uncaught\s+)?(?P<etype>\w*(?:Error|Exception)):\s*(?P<msg>.+)$").unwrap()
});

static GO_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\t(?P<file>\S+\.go):(?P<line>\d+)(?:\s+\+0x[0-9a-f]+)?\s*$").unwrap()
});

static GO_SYMBOL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<symbol>[\w./\-*()]+)\(.*\)\s*$").unwrap()
});

static GO_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:panic|fatal error):\s*(?P<msg>.+)$").unwrap()
});

static RUST_PANIC_OLD: LazyLock<Regex> = LazyLock::new(|| {
    // pre-1.65: panicked at 'message', src/main.rs:10:5
    Regex::new(r"panicked at '(?P<msg>[^']*)',\s+(?P<file>\S+\.rs):(?P<line>\d+):(?P<col>\d+)")
        .unwrap()
});

static RUST_PANIC_NEW: LazyLock<Regex> = LazyLock::new(|| {
    // 1.65+: panicked at src/main.rs:10:5:\nmessage
    Regex::new(r"panicked at\s+(?P<file>\S+\.rs):(?P<line>\d+):(?P<col>\d+):?\s*\n?(?P<msg>.*)")
        .unwrap()
});

static RUST_BACKTRACE_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s+at\s+(?:0x[0-9a-f]+\s+)?(?P<file>\S+\.rs):(?P<line>\d+)(?::(?P<col>\d+))?\s*$")
        .unwrap()
});

static JAVA_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*at\s+(?P<symbol>[\w$.<>]+)\((?P<file>[\w$]+\.(?:java|kt)):(?P<line>\d+)\)")
        .unwrap()
});

static JAVA_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:Caused by:\s*)?(?P<etype>[\w.]+(?:Exception|Error)):\s*(?P<msg>.+)$")
        .unwrap()
});

/// Parse a raw log into structured frames.
///
/// A language hint wins whenever its patterns extract at least one frame;
/// otherwise the log is scored against per-language indicators and the best
/// match that actually yields frames or an error line is used.
pub fn parse(log: &str, hint: Option<Language>) -> ParsedTraceback {
    if let Some(lang) = hint {
        let parsed = parse_as(log, lang);
        if !parsed.frames.is_empty() || parsed.error_message.is_some() {
            return parsed;
        }
    }

    let mut scored: Vec<(Language, usize)> = DETECTION_INDICATORS
        .iter()
        .map(|(lang, keywords)| {
            let score = keywords.iter().filter(|k| log.contains(**k)).count();
            (*lang, score)
        })
        .collect();
    // Stable sort keeps the probe priority order for equal scores.
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    for (lang, score) in scored {
        if score == 0 {
            continue;
        }
        let parsed = parse_as(log, lang);
        if !parsed.frames.is_empty() {
            return parsed;
        }
    }

    ParsedTraceback {
        language: Language::Unknown,
        frames: Vec::new(),
        error_type: None,
        error_message: generic_error_message(log),
    }
}

/// Extract frames assuming a specific language.
pub fn parse_as(log: &str, language: Language) -> ParsedTraceback {
    let (frames, error_type, error_message) = match language {
        Language::Python => parse_python(log),
        Language::Javascript | Language::Typescript => parse_js(log, language),
        Language::Go => parse_go(log),
        Language::Rust => parse_rust(log),
        Language::Java => parse_java(log),
        Language::Unknown => (Vec::new(), None, generic_error_message(log)),
    };
    ParsedTraceback {
        language,
        frames,
        error_type,
        error_message,
    }
}

type Extracted = (Vec<Frame>, Option<String>, Option<String>);

/// Python tracebacks list the outermost caller first, so frames are already
/// oldest-first. The crash line `SomeError: message` is not a frame.
fn parse_python(log: &str) -> Extracted {
    let frames = PY_FRAME
        .captures_iter(log)
        .map(|cap| Frame {
            filepath: cap["file"].to_string(),
            line: cap["line"].parse().unwrap_or(1),
            column: None,
            symbol: cap.name("symbol").map(|m| m.as_str().to_string()),
            raw: cap.get(0).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            external: is_external_python(&cap["file"]),
        })
        .collect();

    let (error_type, error_message) = match PY_ERROR.captures(log) {
        Some(cap) => (
            Some(cap["etype"].to_string()),
            Some(cap["msg"].trim().to_string()),
        ),
        None => (None, None),
    };
    (frames, error_type, error_message)
}

/// JS/Node traces list the crash site first; reverse to oldest-first.
/// `node:internal` and `node_modules` frames are kept but flagged external.
fn parse_js(log: &str, language: Language) -> Extracted {
    let mut frames: Vec<Frame> = JS_FRAME
        .captures_iter(log)
        .map(|cap| {
            let file = cap["file"].to_string();
            let external = file.starts_with("node:")
                || file.contains("node_modules")
                || file.starts_with("internal/");
            Frame {
                filepath: file,
                line: cap["line"].parse().unwrap_or(1),
                column: cap.name("col").and_then(|m| m.as_str().parse().ok()),
                symbol: cap.name("symbol").map(|m| m.as_str().to_string()),
                raw: cap.get(0).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                external,
            }
        })
        .collect();
    frames.reverse();

    // A TypeScript hint narrows the frames to TS files when mixed output
    // (transpiled JS plus sources) is present.
    if language == Language::Typescript && frames.iter().any(|f| is_ts_file(&f.filepath)) {
        frames.retain(|f| is_ts_file(&f.filepath) || f.external);
    }

    let (error_type, error_message) = match JS_ERROR.captures(log) {
        Some(cap) => (
            Some(cap["etype"].to_string()),
            Some(cap["msg"].trim().to_string()),
        ),
        None => (None, None),
    };
    (frames, error_type, error_message)
}

fn is_ts_file(path: &str) -> bool {
    path.ends_with(".ts") || path.ends_with(".tsx") || path.ends_with(".mts") || path.ends_with(".cts")
}

/// Go panics interleave a symbol line (`main.processData(...)`) with a
/// tab-indented location line; the symbol is merged into the following frame.
/// Goroutine stacks list the crash site first; reverse to oldest-first.
fn parse_go(log: &str) -> Extracted {
    let mut frames = Vec::new();
    let mut pending_symbol: Option<String> = None;

    for line in log.lines() {
        if let Some(cap) = GO_FRAME.captures(line) {
            frames.push(Frame {
                filepath: cap["file"].to_string(),
                line: cap["line"].parse().unwrap_or(1),
                column: None,
                symbol: pending_symbol.take(),
                raw: line.trim().to_string(),
                external: false,
            });
        } else if !line.starts_with('\t') {
            pending_symbol = GO_SYMBOL_LINE
                .captures(line)
                .map(|cap| cap["symbol"].to_string());
        }
    }
    frames.reverse();

    let error_message = GO_ERROR
        .captures(log)
        .map(|cap| cap["msg"].trim().to_string());
    let error_type = error_message.as_ref().map(|_| "panic".to_string());
    (frames, error_type, error_message)
}

/// Rust panic headers plus optional `RUST_BACKTRACE=1` frames. Backtraces
/// list the innermost frame first; reverse, then append the panic location
/// as the crash site when it is not already the last frame.
fn parse_rust(log: &str) -> Extracted {
    let mut frames: Vec<Frame> = RUST_BACKTRACE_FRAME
        .captures_iter(log)
        .map(|cap| Frame {
            filepath: cap["file"].to_string(),
            line: cap["line"].parse().unwrap_or(1),
            column: cap.name("col").and_then(|m| m.as_str().parse().ok()),
            symbol: None,
            raw: cap.get(0).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            external: is_external_rust(&cap["file"]),
        })
        .collect();
    frames.reverse();

    let mut error_message = None;
    let panic_cap = RUST_PANIC_OLD
        .captures(log)
        .or_else(|| RUST_PANIC_NEW.captures(log));
    if let Some(cap) = panic_cap {
        let msg = cap
            .name("msg")
            .map(|m| m.as_str().lines().next().unwrap_or("").trim().to_string())
            .filter(|m| !m.is_empty());
        error_message = msg;

        let file = cap["file"].to_string();
        let line: usize = cap["line"].parse().unwrap_or(1);
        let already_last = frames
            .last()
            .map(|f| f.filepath == file && f.line == line)
            .unwrap_or(false);
        if !already_last {
            frames.push(Frame {
                filepath: file.clone(),
                line,
                column: cap.name("col").and_then(|m| m.as_str().parse().ok()),
                symbol: None,
                raw: cap.get(0).map(|m| m.as_str().lines().next().unwrap_or("").trim().to_string()).unwrap_or_default(),
                external: is_external_rust(&file),
            });
        }
    }

    let error_type = error_message.as_ref().map(|_| "panic".to_string());
    (frames, error_type, error_message)
}

/// Java stack traces list the crash site first; reverse to oldest-first.
/// Anonymous inner classes (`Outer$1.method`) are preserved verbatim.
fn parse_java(log: &str) -> Extracted {
    let mut frames: Vec<Frame> = JAVA_FRAME
        .captures_iter(log)
        .map(|cap| Frame {
            filepath: cap["file"].to_string(),
            line: cap["line"].parse().unwrap_or(1),
            column: None,
            symbol: Some(cap["symbol"].to_string()),
            raw: cap.get(0).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            external: is_external_java(&cap["symbol"]),
        })
        .collect();
    frames.reverse();

    let (error_type, error_message) = match JAVA_ERROR.captures(log) {
        Some(cap) => (
            Some(cap["etype"].to_string()),
            Some(cap["msg"].trim().to_string()),
        ),
        None => (None, None),
    };
    (frames, error_type, error_message)
}

fn is_external_python(path: &str) -> bool {
    path.contains("site-packages")
        || path.contains("dist-packages")
        || path.starts_with("/usr/lib/python")
        || path.starts_with("<")
}

fn is_external_rust(path: &str) -> bool {
    path.contains("/rustc/") || path.contains(".cargo/registry") || path.starts_with("/rustc")
}

fn is_external_java(symbol: &str) -> bool {
    symbol.starts_with("java.")
        || symbol.starts_with("javax.")
        || symbol.starts_with("jdk.")
        || symbol.starts_with("sun.")
}

static GENERIC_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^(?:error|exception|fatal):\s*(?P<msg>.+)$").unwrap()
});

fn generic_error_message(log: &str) -> Option<String> {
    GENERIC_ERROR
        .captures(log)
        .map(|cap| cap["msg"].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_index_error() {
        let log = r#"Traceback (most recent call last):
  File "src/main.py", line 42, in process_data
    return items[index]
IndexError: list index out of range
"#;
        let parsed = parse(log, None);
        assert_eq!(parsed.language, Language::Python);
        assert_eq!(parsed.frames.len(), 1);
        let frame = &parsed.frames[0];
        assert_eq!(frame.filepath, "src/main.py");
        assert_eq!(frame.line, 42);
        assert_eq!(frame.symbol.as_deref(), Some("process_data"));
        assert_eq!(parsed.error_type.as_deref(), Some("IndexError"));
        assert_eq!(
            parsed.error_message.as_deref(),
            Some("list index out of range")
        );
    }

    #[test]
    fn python_frames_stay_oldest_first() {
        let log = r#"  File "src/main.py", line 10, in <module>
    run()
  File "src/main.py", line 6, in run
    result = process_data(data)
  File "src/utils.py", line 5, in process_data
    total += item.value
AttributeError: 'int' object has no attribute 'value'
"#;
        let parsed = parse(log, None);
        assert_eq!(parsed.frames.len(), 3);
        assert_eq!(parsed.frames[0].symbol.as_deref(), Some("<module>"));
        let crash = parsed.crash_frame().unwrap();
        assert_eq!(crash.filepath, "src/utils.py");
        assert_eq!(crash.line, 5);
        assert_eq!(parsed.error_type.as_deref(), Some("AttributeError"));
    }

    #[test]
    fn python_frame_round_trips_through_its_raw_text() {
        let log = "  File \"src/app.py\", line 7, in handler\n    do()\nValueError: bad\n";
        let parsed = parse(log, None);
        let frame = parsed.frames[0].clone();
        let reparsed = parse_as(&frame.raw, Language::Python);
        assert_eq!(reparsed.frames.len(), 1);
        assert_eq!(reparsed.frames[0].filepath, frame.filepath);
        assert_eq!(reparsed.frames[0].line, frame.line);
        assert_eq!(reparsed.frames[0].symbol, frame.symbol);
    }

    #[test]
    fn go_panic_merges_goroutine_symbol() {
        let log = "panic: runtime error: index out of range [5] with length 3\ngoroutine 1 [running]:\nmain.processData(...)\n\t/app/main.go:25 +0x1f\n";
        let parsed = parse(log, None);
        assert_eq!(parsed.language, Language::Go);
        assert_eq!(parsed.frames.len(), 1);
        let frame = &parsed.frames[0];
        assert_eq!(frame.filepath, "/app/main.go");
        assert_eq!(frame.line, 25);
        assert_eq!(frame.symbol.as_deref(), Some("main.processData"));
        assert_eq!(
            parsed.error_message.as_deref(),
            Some("runtime error: index out of range [5] with length 3")
        );
    }

    #[test]
    fn go_frames_reverse_to_oldest_first() {
        let log = "panic: boom\ngoroutine 1 [running]:\npkg.inner(...)\n\t/app/inner.go:5 +0x10\nmain.main()\n\t/app/main.go:12 +0x20\n";
        let parsed = parse(log, None);
        assert_eq!(parsed.frames.len(), 2);
        assert_eq!(parsed.frames[0].filepath, "/app/main.go");
        assert_eq!(parsed.crash_frame().unwrap().filepath, "/app/inner.go");
    }

    #[test]
    fn js_trace_reverses_and_flags_internals() {
        let log = r#"TypeError: Cannot read properties of undefined (reading 'map')
    at render (src/app.js:15:10)
    at main (src/index.js:4:3)
    at node:internal/modules/run_main:23:11
"#;
        let parsed = parse(log, None);
        assert_eq!(parsed.language, Language::Javascript);
        assert_eq!(parsed.frames.len(), 3);
        // Reversed: internals (listed last) become the outermost caller.
        assert!(parsed.frames[0].external);
        assert_eq!(parsed.frames[1].filepath, "src/index.js");
        let crash = parsed.crash_frame().unwrap();
        assert_eq!(crash.filepath, "src/app.js");
        assert_eq!(crash.line, 15);
        assert_eq!(crash.column, Some(10));
        assert_eq!(crash.symbol.as_deref(), Some("render"));
        assert_eq!(parsed.error_type.as_deref(), Some("TypeError"));
    }

    #[test]
    fn js_frame_round_trips_through_its_raw_text() {
        let log = "Error: nope\n    at handler (lib/router.js:88:9)\n";
        let parsed = parse(log, None);
        let frame = parsed.frames[0].clone();
        let reparsed = parse_as(&frame.raw, Language::Javascript);
        assert_eq!(reparsed.frames[0], Frame { raw: frame.raw.clone(), ..frame });
    }

    #[test]
    fn java_preserves_anonymous_inner_classes() {
        let log = r#"java.lang.NullPointerException: oh no
    at com.example.Outer$1.run(Outer.java:42)
    at com.example.Main.main(Main.java:9)
"#;
        let parsed = parse(log, None);
        assert_eq!(parsed.language, Language::Java);
        assert_eq!(parsed.frames.len(), 2);
        assert_eq!(parsed.frames[0].filepath, "Main.java");
        let crash = parsed.crash_frame().unwrap();
        assert_eq!(crash.symbol.as_deref(), Some("com.example.Outer$1.run"));
        assert_eq!(parsed.error_type.as_deref(), Some("java.lang.NullPointerException"));
    }

    #[test]
    fn rust_panic_old_and_new_formats() {
        let old = "thread 'main' panicked at 'index out of bounds', src/main.rs:10:5\n";
        let parsed = parse(old, None);
        assert_eq!(parsed.language, Language::Rust);
        assert_eq!(parsed.frames.len(), 1);
        assert_eq!(parsed.frames[0].filepath, "src/main.rs");
        assert_eq!(parsed.frames[0].line, 10);
        assert_eq!(parsed.error_message.as_deref(), Some("index out of bounds"));

        let new = "thread 'main' panicked at src/lib.rs:7:13:\ncalled `Option::unwrap()` on a `None` value\n";
        let parsed = parse(new, None);
        assert_eq!(parsed.frames[0].filepath, "src/lib.rs");
        assert_eq!(parsed.frames[0].line, 7);
        assert_eq!(
            parsed.error_message.as_deref(),
            Some("called `Option::unwrap()` on a `None` value")
        );
    }

    #[test]
    fn rust_backtrace_frames_reverse_and_keep_panic_site_last() {
        let log = "thread 'main' panicked at 'boom', src/deep.rs:3:9\nstack backtrace:\n   2: app::deep\n             at src/deep.rs:3:9\n   3: app::main\n             at src/main.rs:11:5\n";
        let parsed = parse(log, None);
        assert_eq!(parsed.frames.first().unwrap().filepath, "src/main.rs");
        assert_eq!(parsed.crash_frame().unwrap().filepath, "src/deep.rs");
    }

    #[test]
    fn hint_wins_when_its_patterns_match() {
        let log = "    at handler (src/app.ts:3:1)\n";
        let parsed = parse(log, Some(Language::Typescript));
        assert_eq!(parsed.language, Language::Typescript);
        assert_eq!(parsed.frames.len(), 1);
    }

    #[test]
    fn unmatched_log_returns_unknown_and_no_frames() {
        let parsed = parse("something strange happened", None);
        assert_eq!(parsed.language, Language::Unknown);
        assert!(parsed.frames.is_empty());
    }

    #[test]
    fn frame_lines_are_positive() {
        let log = "  File \"a.py\", line 3, in f\nKeyError: 'x'\n";
        let parsed = parse(log, None);
        assert!(parsed.frames.iter().all(|f| f.line >= 1));
    }
}
