use std::fs;
use std::path::{Path, PathBuf};

use insta::assert_snapshot;
use tinka::error::{AnalyzeErrorKind, CompileError};
use tinka::{build, compile, compile_sources, generate_assembly};

const INC: &str = "\
-- adds one to its argument
kue inc
cersva inc n rinyv
  anax r
  krz n r
  ata 1 r
  dosnud r
situv
";

const MAIN: &str = "\
kue _fasal
xok inc
cersva _fasal rinyv
  anax x
  fenxeo inc 41 el x
  dosnud x
situv
";

/// Scratch directory unique to this test process and test name.
fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("tinka-{}-{name}", std::process::id()));
  let _ = fs::remove_dir_all(&dir);
  fs::create_dir_all(&dir).unwrap();
  dir
}

fn write_source(dir: &Path, name: &str, source: &str) -> PathBuf {
  let path = dir.join(name);
  fs::write(&path, source).unwrap();
  path
}

#[test]
fn exported_function_called_from_another_file() {
  let compilation = compile_sources(&[("inc.tinka", INC), ("main.tinka", MAIN)]).unwrap();
  assert!(compilation.has_entry_point);
  assert_snapshot!(compilation.assembly(), @r"
  krz _fasal xx
  kue _fasal
  xok inc
  nll _fasal
  nta 4 f5
  nta 4 f5
  krz 41 f5@
  nta 4 f5
  inj inc xx f5@
  ata 8 f5
  krz f0 f5+0@
  krz f5+0@ f0
  krz dosnud1 xx
  nll dosnud1
  ata 4 f5
  krz f5@ xx
  kue inc
  nll inc
  nta 4 f5
  krz f5+8@ f5+0@
  ata 1 f5+0@
  krz f5+0@ f0
  krz dosnud2 xx
  nll dosnud2
  ata 4 f5
  krz f5@ xx
  ");
}

#[test]
fn call_target_matches_exported_label() {
  let compilation = compile_sources(&[("inc.tinka", INC), ("main.tinka", MAIN)]).unwrap();
  let text = compilation.assembly();
  let defined: Vec<&str> = text
    .lines()
    .filter_map(|line| line.strip_prefix("nll "))
    .collect();
  let called: Vec<&str> = text
    .lines()
    .filter_map(|line| line.strip_prefix("inj "))
    .filter_map(|rest| rest.split_whitespace().next())
    .collect();
  assert_eq!(called, ["inc"]);
  assert!(defined.contains(&"inc"));
}

#[test]
fn counting_loop() {
  let source = "\
kue sum
cersva sum n rinyv
  anax acc
  anax i
  krz 0 acc
  krz 0 i
  fal i xylo n rinyv -- while i < n
    ata i acc
    ata 1 i
  situv
  dosnud acc
situv
";
  assert_snapshot!(generate_assembly(source).unwrap(), @r"
  kue sum
  nll sum
  nta 4 f5
  nta 4 f5
  krz 0 f5+4@
  krz 0 f5+0@
  nll fal-rinyv0
  krz f5+0@ f1
  fi f1 f5+12@ xolo
  malkrz fal0 xx
  ata f5+0@ f5+4@
  ata 1 f5+0@
  krz fal-rinyv0 xx
  nll fal0
  krz f5+4@ f0
  krz dosnud1 xx
  nll dosnud1
  ata 8 f5
  krz f5@ xx
  ");
}

#[test]
fn if_label_is_branched_to_and_closed_once() {
  let source = "cersva f a rinyv fi a clo 0 rinyv krz 1 a situv dosnud a situv";
  let text = generate_assembly(source).unwrap();
  let lines: Vec<&str> = text.lines().collect();
  let branch = lines.iter().position(|l| *l == "malkrz fi0 xx").unwrap();
  let close = lines.iter().position(|l| *l == "nll fi0").unwrap();
  assert!(branch < close);
  assert_eq!(lines[branch + 1], "krz 1 f5+4@");
  assert_eq!(text.matches("fi0").count(), 2);
}

#[test]
fn builds_output_file() {
  let dir = scratch_dir("build");
  let inc = write_source(&dir, "inc.tinka", INC);
  let main = write_source(&dir, "main.tinka", MAIN);
  let output = dir.join("a.out");

  let compilation = build(&[&inc, &main], &output).unwrap();
  let written = fs::read_to_string(&output).unwrap();
  assert_eq!(written, compilation.assembly());
  assert!(written.starts_with("krz _fasal xx\n"));
  assert!(!dir.join("a.out.partial").exists());
}

#[test]
fn failed_build_writes_nothing() {
  let dir = scratch_dir("failed");
  let broken = write_source(&dir, "broken.tinka", "cersva f rinyv fi 1 clo 1 rinyv situv");
  let output = dir.join("a.out");

  let err = build(&[&broken], &output).unwrap_err();
  assert!(matches!(
    err,
    CompileError::Analyze {
      kind: AnalyzeErrorKind::UnbalancedBlocks { open: 1 },
      ..
    }
  ));
  assert!(!output.exists());
  assert!(!dir.join("a.out.partial").exists());
}

#[test]
fn unreadable_input_is_reported() {
  let dir = scratch_dir("missing");
  let err = compile(&[dir.join("nope.tinka")]).unwrap_err();
  assert!(matches!(err, CompileError::ReadSource { .. }));
  assert!(err.to_string().contains("nope.tinka"));
}

#[test]
fn non_tinka_inputs_are_rejected() {
  let dir = scratch_dir("extension");
  let good = write_source(&dir, "ok.tinka", MAIN);
  let bad = write_source(&dir, "notes.md", "kue x");
  let err = compile(&[good, bad]).unwrap_err();
  assert!(matches!(err, CompileError::NotTinkaFile { .. }));
}

#[test]
fn analyzer_errors_show_the_source_line() {
  let err = compile_sources(&[("bad.tinka", "cersva f rinyv\n  fi x <= 1 rinyv situv\nsituv")])
    .unwrap_err();
  let message = err.to_string();
  assert!(message.contains("unknown comparison '<='"));
  assert!(message.contains("bad.tinka:2:8"));
  assert!(message.contains("  fi x <= 1 rinyv situv"));
}
