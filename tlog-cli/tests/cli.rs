// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fs, process::Command};

fn tlog_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tlog"))
}

fn write_log(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.log");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

const ONE_LINE: &str = "{\"ver\":\"2.2\",\"host\":\"h\",\"user\":\"u\",\"term\":\"xterm\",\
    \"session\":1,\"id\":1,\"pos\":0,\"timing\":\">1\",\
    \"in_txt\":\"\",\"in_bin\":[],\"out_txt\":\"A\",\"out_bin\":[]}\n";

#[test]
fn check_accepts_a_well_formed_log() {
    let (_dir, path) = write_log(ONE_LINE);
    let output = tlog_bin().arg("check").arg(&path).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("ok"));
}

#[test]
fn check_reports_a_non_contiguous_id() {
    let mut log = ONE_LINE.to_string();
    log.push_str(&ONE_LINE.replace("\"id\":1", "\"id\":3"));
    let (_dir, path) = write_log(&log);
    let output = tlog_bin().arg("check").arg(&path).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn dump_prints_one_line_per_packet() {
    let (_dir, path) = write_log(ONE_LINE);
    let output = tlog_bin().arg("dump").arg(&path).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("out"));
    assert!(stdout.contains("\"A\""));
}

#[test]
fn dump_honors_the_identity_filter() {
    let (_dir, path) = write_log(ONE_LINE);
    let output = tlog_bin().arg("dump").arg(&path).arg("--user").arg("nobody").output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).is_empty());
}
