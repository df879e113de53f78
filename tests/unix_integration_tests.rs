// tests/unix_integration_tests.rs
use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn jlog() -> Command {
    let mut cmd = Command::cargo_bin("jlog").unwrap();
    cmd.env_remove("JLOG_LOG").args(["--zone", "utc", "-M"]);
    cmd
}

fn numbered(n: usize) -> String {
    (1..=n)
        .map(|i| format!("{{\"m\":\"line {}\"}}\n", i))
        .collect()
}

#[test]
fn test_pretty_prints_detected_logs() {
    jlog()
        .write_stdin("{\"ts\":1,\"level\":\"info\",\"msg\":\"hi\",\"user\":\"bob\"}\n")
        .assert()
        .success()
        .stdout("INFO  Jan  1 00:00:01 hi user:bob\n")
        .stderr("  1 line read; no parse errors.\n");
}

#[test]
fn test_no_summary() {
    jlog()
        .arg("--no-summary")
        .write_stdin("{\"ts\":1,\"level\":\"info\",\"msg\":\"hi\"}\n")
        .assert()
        .success()
        .stderr("");
}

#[test]
fn test_parse_errors_are_reported_separately() {
    jlog()
        .write_stdin("garbage\n")
        .assert()
        .success()
        .stdout("garbage\n")
        .stderr(predicate::str::contains("    ↳ line 1: parse: unmarshal json"))
        .stderr(predicate::str::contains("1 line read; 1 parse error."));
}

#[test]
fn test_lax_mode() {
    jlog()
        .arg("--lax")
        .write_stdin("garbage\n")
        .assert()
        .success()
        .stdout("UNK   ??? garbage\n")
        .stderr("  1 line read; no parse errors.\n");
}

#[test]
fn test_context_flags() {
    jlog()
        .args(["--notimekey", "--nolevelkey", "--messagekey", "m"])
        .args(["-C", "1", "-g", "^line [28]$", "-S", "m"])
        .write_stdin(numbered(10))
        .assert()
        .success()
        .stdout("line 1\nline 2\nline 3\n---\nline 7\nline 8\nline 9\n")
        .stderr(predicate::str::contains("10 lines read (8 lines filtered)"));
}

#[test]
fn test_after_overrides_context() {
    jlog()
        .args(["--notimekey", "--nolevelkey", "--messagekey", "m"])
        .args(["-C", "1", "-A", "0", "-g", "^line 5$"])
        .write_stdin(numbered(10))
        .assert()
        .success()
        .stdout("line 4\nline 5\n");
}

#[test]
fn test_program_flag() {
    jlog()
        .args(["-e", "if LVL < WARN:\n    skip()\n"])
        .write_stdin(concat!(
            "{\"ts\":1,\"level\":\"info\",\"msg\":\"fine\"}\n",
            "{\"ts\":2,\"level\":\"error\",\"msg\":\"broken\"}\n",
        ))
        .assert()
        .success()
        .stdout("ERROR Jan  1 00:00:02 broken\n")
        .stderr("  2 lines read (1 line filtered); no parse errors.\n");
}

#[test]
fn test_native_steps_flag() {
    jlog()
        .args(["--steps", r#"[{"project": ["user"]}]"#])
        .write_stdin("{\"ts\":1,\"level\":\"info\",\"msg\":\"hi\",\"user\":\"bob\",\"pid\":7}\n")
        .assert()
        .success()
        .stdout("INFO  Jan  1 00:00:01 hi user:bob\n");
}

#[test]
fn test_multiple_files_share_one_summary() {
    let mut first = NamedTempFile::new().unwrap();
    writeln!(first, "{{\"ts\":1,\"level\":\"info\",\"msg\":\"a\",\"k\":1}}").unwrap();
    let mut second = NamedTempFile::new().unwrap();
    writeln!(second, "{{\"ts\":2,\"level\":\"info\",\"msg\":\"b\",\"k\":1}}").unwrap();

    jlog()
        .arg(first.path())
        .arg(second.path())
        .assert()
        .success()
        .stdout("INFO  Jan  1 00:00:01 a k:1\nINFO  Jan  1 00:00:02 b k:↑\n")
        .stderr("  2 lines read; no parse errors.\n");
}

#[test]
fn test_env_configuration() {
    jlog()
        .env("JLOG_NO_ELIDE", "true")
        .env("JLOG_TIME_FORMAT", "rfc3339")
        .write_stdin(concat!(
            "{\"ts\":1,\"level\":\"info\",\"msg\":\"a\",\"k\":1}\n",
            "{\"ts\":1,\"level\":\"info\",\"msg\":\"b\",\"k\":1}\n",
        ))
        .assert()
        .success()
        .stdout(concat!(
            "INFO  1970-01-01T00:00:01+00:00 a k:1\n",
            "INFO  1970-01-01T00:00:01+00:00 b k:1\n",
        ));
}

#[test]
fn test_missing_file_fails() {
    jlog()
        .arg("/definitely/not/here.log")
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("jlog: open /definitely/not/here.log"));
}

#[test]
fn test_conflicting_regexes_fail() {
    jlog()
        .args(["-g", "a", "-G", "b"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot combine a match regex with a no-match regex"));
}

#[test]
fn test_bad_settings_fail() {
    jlog()
        .args(["-S", "x"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown regex scope"));
    jlog()
        .args(["--zone", "mars"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid zone"));
    jlog()
        .args(["-e", "def ("])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Starlark syntax error"));
}

#[test]
fn test_overlong_line_is_fatal() {
    jlog()
        .args(["--max-line-length", "8"])
        .write_stdin("short\nmuch too long for this\n")
        .assert()
        .code(1)
        .stdout("short\n")
        .stderr(predicate::str::contains("jlog: line 2 longer than 8 bytes"));
}
