//! End-to-end tests driving real programs through a session.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tuitest::{
    Color, Emulator, Grid, HarnessConfig, HarnessError, Session, Settled, StdinSource, Style,
    StyleFlags, Vt100Engine,
};

fn sh(script: &str) -> HarnessConfig {
    HarnessConfig::new("sh").arg("-c").arg(script)
}

fn finished(config: HarnessConfig) -> Session {
    let mut session = Session::start(config).unwrap();
    session.wait_for_finished().unwrap();
    session
}

const ALL_16_COLORS: &str = r#"for c in 30 31 32 33 34 35 36 37 90 91 92 93 94 95 96 97; do
    printf '\033[%sm%s\033[0m\n' "$c" "$c"
done
printf 'default\n'"#;

const ALL_16_BACKGROUNDS: &str = r#"for c in 40 41 42 43 44 45 46 47 100 101 102 103 104 105 106 107; do
    printf '\033[%sm%s\033[0m\n' "$c" "$c"
done
printf 'default\n'"#;

#[test]
fn test_echo_with_captured_stdout() {
    let mut session = Session::start(sh("echo things").capture_stdout(true)).unwrap();
    let result = session.wait_for_finished().unwrap();

    assert_eq!(result.status, 0);
    assert!(result.success());
    assert_eq!(result.stdout.as_deref(), Some("things\n"));
    assert_eq!(result.stderr, None);
    assert_eq!(session.string_at(0, 0, 6).unwrap(), "      ");
}

#[test]
fn test_captures_stdout_and_stderr_separately() {
    let config = sh("echo 'This goes to stdout'; echo 'This goes to stderr' >&2")
        .capture_stdout(true)
        .capture_stderr(true);
    let mut session = Session::start(config).unwrap();
    let result = session.wait_for_finished().unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(result.stdout.as_deref(), Some("This goes to stdout\n"));
    assert_eq!(result.stderr.as_deref(), Some("This goes to stderr\n"));
}

#[test]
fn test_uncaptured_output_lands_on_screen() {
    let mut session =
        Session::start(sh("echo 'This goes to stdout'; echo 'This goes to stderr' >&2")).unwrap();
    let result = session.wait_for_finished().unwrap();

    assert_eq!(result.stdout, None);
    assert_eq!(result.stderr, None);
    assert_eq!(session.string_at(0, 0, 19).unwrap(), "This goes to stdout");
    assert_eq!(session.string_at(1, 0, 19).unwrap(), "This goes to stderr");
}

#[test]
fn test_exit_status_is_reported() {
    let mut session = Session::start(sh("exit 3")).unwrap();
    let result = session.wait_for_finished().unwrap();
    assert_eq!(result.status, 3);
    assert!(!result.success());
    assert_eq!(session.exit_state().status, Some(3));
}

#[test]
fn test_wait_for_finished_is_repeatable() {
    let mut session = Session::start(sh("printf once; exit 4")).unwrap();
    let first = session.wait_for_finished().unwrap();
    let second = session.wait_for_finished().unwrap();
    assert_eq!(first, second);
    assert_eq!(session.string_at(0, 0, 4).unwrap(), "once");
}

#[test]
fn test_finished_timeout_leaves_process_running() {
    let mut session = Session::start(sh("sleep 30")).unwrap();
    let err = session
        .wait_for_finished_within(Duration::from_millis(200))
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(!session.exit_state().is_finished());

    session.close();
    assert!(session.exit_state().is_finished());
}

#[test]
fn test_finished_wait_can_be_retried_after_timeout() {
    let mut session = Session::start(sh("sleep 0.5; printf done")).unwrap();
    let err = session
        .wait_for_finished_within(Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, HarnessError::Timeout { .. }));

    let result = session
        .wait_for_finished_within(Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.status, 0);
    assert_eq!(session.string_at(0, 0, 4).unwrap(), "done");
}

#[test]
fn test_stable_wait_can_be_retried_after_timeout() {
    let mut session = Session::start(sh("printf a; sleep 0.5; printf b; sleep 30")).unwrap();
    let err = session
        .wait_for_stable_output_within(Duration::from_millis(100), Duration::from_secs(2))
        .unwrap_err();
    assert!(err.is_timeout());

    let settled = session
        .wait_for_stable_output_within(Duration::from_secs(10), Duration::from_millis(1000))
        .unwrap();
    assert_eq!(settled, Settled::Quiescent);
    assert_eq!(session.string_at(0, 0, 2).unwrap(), "ab");
}

#[test]
fn test_send_to_a_program_that_never_reads_is_bounded() {
    let mut session = Session::start(sh("sleep 30")).unwrap();
    let started = Instant::now();
    let result = session.send(vec![b'a'; 200_000]);

    assert!(started.elapsed() < Duration::from_secs(3));
    if let Err(err) = result {
        match err {
            HarnessError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

#[test]
fn test_stable_output_while_process_keeps_running() {
    let mut session = Session::start(sh("printf hello; sleep 30")).unwrap();
    let settled = session
        .wait_for_stable_output_within(Duration::from_secs(5), Duration::from_millis(200))
        .unwrap();

    assert_eq!(settled, Settled::Quiescent);
    assert_eq!(session.string_at(0, 0, 5).unwrap(), "hello");
    assert_eq!(session.cursor(), (0, 5));
}

#[test]
fn test_stable_output_ends_when_process_exits() {
    let mut session = Session::start(sh("printf bye")).unwrap();
    let settled = session
        .wait_for_stable_output_within(Duration::from_secs(5), Duration::from_secs(3))
        .unwrap();

    match settled {
        Settled::Exited(state) => assert_eq!(state.status, Some(0)),
        Settled::Quiescent => panic!("expected the exit to end the wait"),
    }
    assert_eq!(session.string_at(0, 0, 3).unwrap(), "bye");
}

#[test]
fn test_stable_output_times_out_on_endless_output() {
    let mut session = Session::start(HarnessConfig::new("yes")).unwrap();
    let err = session
        .wait_for_stable_output_within(Duration::from_millis(300), Duration::from_millis(200))
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(session.string_at(0, 0, 1).unwrap(), "y");
}

#[test]
fn test_typed_input_is_echoed_and_read() {
    let mut session = Session::start(HarnessConfig::new("cat")).unwrap();
    session
        .wait_for_stable_output_within(Duration::from_secs(5), Duration::from_millis(100))
        .unwrap();

    session.send("th\r").unwrap();
    session
        .wait_for_stable_output_within(Duration::from_secs(5), Duration::from_millis(200))
        .unwrap();

    // Line discipline echo first, then cat's copy.
    assert_eq!(session.string_at(0, 0, 2).unwrap(), "th");
    assert_eq!(session.string_at(1, 0, 2).unwrap(), "th");
}

#[test]
fn test_stdin_payload_on_terminal() {
    let config = sh("read line; echo \"got $line\"").stdin("abc\n");
    let session = finished(config);
    assert_eq!(session.string_at(0, 0, 3).unwrap(), "abc");
    assert_eq!(session.string_at(1, 0, 7).unwrap(), "got abc");
}

#[test]
fn test_stdin_payload_through_pipe() {
    let config = HarnessConfig::new("wc")
        .arg("-c")
        .stdin("test")
        .stdin_source(StdinSource::Pipe)
        .capture_stdout(true);
    let mut session = Session::start(config).unwrap();
    let result = session.wait_for_finished().unwrap();

    assert_eq!(result.status, 0);
    assert_eq!(result.stdout.as_deref().map(str::trim), Some("4"));
}

#[test]
fn test_environment_reaches_the_program() {
    let session = finished(sh("echo \"$SOME_VAR\"; echo \"$TERM\"").env("SOME_VAR", "stuff"));
    assert_eq!(session.string_at(0, 0, 5).unwrap(), "stuff");
    assert_eq!(session.string_at(1, 0, 5).unwrap(), "linux");
}

#[test]
fn test_terminal_size_via_env_and_ioctl() {
    let session = finished(sh("echo \"$COLUMNS $LINES\"; stty size").size(10, 15));
    assert_eq!(session.size(), (10, 15));
    assert_eq!(session.string_at(0, 0, 5).unwrap(), "10 15");
    assert_eq!(session.string_at(1, 0, 5).unwrap(), "15 10");
}

#[test]
fn test_query_bounds() {
    let session = finished(sh("printf x").size(10, 10));

    for (line, column, length) in [(5, 10, 1), (10, 5, 1), (10, 10, 1), (5, 8, 3), (5, 5, 0)] {
        let err = session.string_at(line, column, length).unwrap_err();
        assert!(err.is_out_of_bounds(), "({line}, {column}, {length})");
    }
    assert!(session.foreground_at(10, 0).unwrap_err().is_out_of_bounds());
    assert!(session.background_at(0, 10).unwrap_err().is_out_of_bounds());
    assert!(session
        .has_style_at(10, 10, Style::Bold)
        .unwrap_err()
        .is_out_of_bounds());

    assert_eq!(session.string_at(9, 9, 1).unwrap(), " ");
    assert_eq!(session.string_at(5, 0, 10).unwrap(), " ".repeat(10));
}

#[test]
fn test_untouched_cells_have_defaults() {
    let session = finished(sh("printf x"));
    assert_eq!(session.string_at(3, 3, 1).unwrap(), " ");
    assert_eq!(session.foreground_at(3, 3).unwrap(), Color::Default);
    assert_eq!(session.background_at(3, 3).unwrap(), Color::Default);
    assert!(!session.has_style_at(3, 3, Style::Bold).unwrap());
}

#[test]
fn test_all_16_foreground_colors() {
    let session = finished(sh(ALL_16_COLORS));
    for (line, expected) in Color::named().iter().enumerate() {
        assert_eq!(session.foreground_at(line, 0).unwrap(), *expected, "line {line}");
        assert_eq!(session.background_at(line, 0).unwrap(), Color::Default);
    }
    assert_eq!(session.foreground_at(16, 0).unwrap(), Color::Default);
    assert_eq!(session.string_at(16, 0, 7).unwrap(), "default");
}

#[test]
fn test_all_16_background_colors() {
    let session = finished(sh(ALL_16_BACKGROUNDS));
    for (line, expected) in Color::named().iter().enumerate() {
        assert_eq!(session.background_at(line, 0).unwrap(), *expected, "line {line}");
        assert_eq!(session.foreground_at(line, 0).unwrap(), Color::Default);
    }
    assert_eq!(session.background_at(16, 0).unwrap(), Color::Default);
}

#[test]
fn test_extended_colors() {
    let session = finished(sh(
        r"printf '\033[38;5;196mA\033[48;2;1;2;3mB\033[0m'",
    ));
    assert_eq!(session.foreground_at(0, 0).unwrap(), Color::Indexed(196));
    assert!(!session.foreground_at(0, 0).unwrap().is_standard());
    assert_eq!(session.background_at(0, 1).unwrap(), Color::Rgb(1, 2, 3));
}

#[test]
fn test_styles() {
    let session = finished(sh(
        r"printf '\033[1mB\033[0m\033[3mI\033[0m\033[4mU\033[0m\033[7mR\033[0mN'",
    ));
    let expected = [
        Style::Bold,
        Style::Italic,
        Style::Underline,
        Style::Inverse,
    ];
    for (column, style) in expected.into_iter().enumerate() {
        assert!(session.has_style_at(0, column, style).unwrap(), "{style:?}");
        for other in expected.into_iter().filter(|s| *s != style) {
            assert!(!session.has_style_at(0, column, other).unwrap());
        }
    }
    for style in expected {
        assert!(!session.has_style_at(0, 4, style).unwrap());
    }
    assert!(matches!(
        session.has_style_at(0, 0, Style::Strikethrough),
        Err(HarnessError::UnsupportedStyle(Style::Strikethrough))
    ));
}

#[test]
fn test_output_order_survives_scrolling() {
    let session = finished(HarnessConfig::new("seq").args(["1", "200"]));
    assert_eq!(session.string_at(0, 0, 3).unwrap(), "178");
    assert_eq!(session.string_at(22, 0, 3).unwrap(), "200");
    assert_eq!(session.string_at(23, 0, 3).unwrap(), "   ");
}

#[test]
fn test_wide_glyphs_read_back_whole() {
    let session = finished(sh("printf '日本x'"));
    assert_eq!(session.string_at(0, 0, 5).unwrap(), "日本x");
    assert_eq!(session.string_at(0, 1, 1).unwrap(), "");
}

#[test]
fn test_send_after_exit_fails() {
    let mut session = finished(HarnessConfig::new("true"));
    assert!(matches!(session.send("late"), Err(HarnessError::Io(_))));
}

#[test]
fn test_close_is_idempotent() {
    let mut session = Session::start(HarnessConfig::new("cat")).unwrap();
    session.close();
    session.close();
    assert!(session.is_closed());
    assert!(matches!(session.send("x"), Err(HarnessError::Io(_))));
    assert!(session.exit_state().is_finished());
}

#[test]
fn test_missing_executable() {
    let err = Session::start(HarnessConfig::new("/nonexistent/program")).unwrap_err();
    assert!(matches!(err, HarnessError::Spawn { .. }));
}

#[test]
fn test_script_file_from_toml_config() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("greet.sh");
    fs::write(&script, "printf '\\033[32mgreen\\033[0m\\n'\nexit 7\n").unwrap();

    let config_path = dir.path().join("tuitest.toml");
    fs::write(
        &config_path,
        format!(
            "executable = \"sh\"\nargs = [{:?}]\ncolumns = 30\nlines = 5\n",
            script.display().to_string()
        ),
    )
    .unwrap();

    let mut session = Session::start(HarnessConfig::load(&config_path).unwrap()).unwrap();
    let result = session.wait_for_finished().unwrap();

    assert_eq!(result.status, 7);
    assert_eq!(session.size(), (30, 5));
    assert_eq!(session.string_at(0, 0, 5).unwrap(), "green");
    assert_eq!(session.foreground_at(0, 0).unwrap(), Color::Green);
    assert_eq!(session.screen_text(), "green");
}

/// Wraps the default engine and records every byte it is fed.
struct RecordingEngine {
    inner: Vt100Engine,
    seen: Rc<RefCell<Vec<u8>>>,
}

impl Emulator for RecordingEngine {
    fn feed(&mut self, bytes: &[u8]) {
        self.seen.borrow_mut().extend_from_slice(bytes);
        self.inner.feed(bytes);
    }

    fn size(&self) -> (u16, u16) {
        self.inner.size()
    }

    fn tracked_styles(&self) -> StyleFlags {
        self.inner.tracked_styles()
    }

    fn snapshot(&self) -> Grid {
        self.inner.snapshot()
    }
}

#[test]
fn test_custom_engine_sees_bytes_in_order() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let engine = RecordingEngine {
        inner: Vt100Engine::new(80, 24),
        seen: Rc::clone(&seen),
    };

    let mut session =
        Session::start_with_engine(sh("printf one; printf two; printf three"), Box::new(engine))
            .unwrap();
    session.wait_for_finished().unwrap();

    assert_eq!(seen.borrow().as_slice(), b"onetwothree");
    assert_eq!(session.string_at(0, 0, 11).unwrap(), "onetwothree");
}
