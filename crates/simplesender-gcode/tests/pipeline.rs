//! Load pipeline fixtures: the byte policy end to end, streaming temp
//! files, and resume planning over both source kinds.

use std::io::Write;

use simplesender_core::constants::MAX_LINE_BYTES;
use simplesender_gcode::words::parse_words;
use simplesender_gcode::{
    build_resume_preamble, load_job_from_lines, load_job_from_path, JobSource, LoadOptions,
};

fn axis_value(line: &str, letter: char) -> Option<f64> {
    parse_words(&line.to_ascii_uppercase())
        .iter()
        .find(|w| w.letter == letter)
        .and_then(|w| w.number())
}

#[test]
fn overlong_linear_move_splits_to_same_endpoint() {
    // Argument precision alone pushes this G1 past 80 bytes; everything
    // else about it is a plain linear move.
    let long = "G1 X10.000000000000000000000000001 \
         Y10.000000000000000000000000001 Z-0.500000000000000000000000001 F1200";
    let gcode = format!("G21\nG90\n{}\n", long);
    let loaded = load_job_from_lines(gcode.lines(), LoadOptions::default()).unwrap();
    assert_eq!(loaded.stats.split_count, 1);

    let lines: Vec<String> = loaded.job.source.iter_from(0).map(|l| l.text).collect();
    assert!(lines.len() > 3, "expected sub-segments, got {lines:?}");

    // Policy: every sub-line fits, F rides only on the first segment.
    let segments = &lines[2..];
    assert!(segments[0].contains("F1200"));
    for seg in segments {
        assert!(seg.len() + 1 <= MAX_LINE_BYTES);
    }
    for seg in &segments[1..] {
        assert!(!seg.contains('F'));
    }

    // Endpoint: the last absolute segment lands on the original target.
    let last = segments.last().unwrap();
    assert!((axis_value(last, 'X').unwrap() - 10.0).abs() < 1e-6);
    assert!((axis_value(last, 'Y').unwrap() - 10.0).abs() < 1e-6);
    assert!((axis_value(last, 'Z').unwrap() + 0.5).abs() < 1e-6);

    // Sub-segments inherit the original file line number.
    let numbered: Vec<_> = loaded.job.source.iter_from(2).collect();
    assert!(numbered.iter().all(|l| l.source_line == Some(3)));
}

#[test]
fn second_pass_is_byte_identical() {
    let gcode = "N100 G21\nG90 ; absolute\n(header)\nG01 X010.50 Y0.250 F0600.0\nM30\n";
    let first = load_job_from_lines(gcode.lines(), LoadOptions::default()).unwrap();
    let emitted: Vec<String> = first.job.source.iter_from(0).map(|l| l.text).collect();
    let second =
        load_job_from_lines(emitted.join("\n").lines(), LoadOptions::default()).unwrap();
    let emitted_again: Vec<String> = second.job.source.iter_from(0).map(|l| l.text).collect();
    assert_eq!(emitted, emitted_again);
    assert_eq!(second.stats.modified_count, 0);
}

#[test]
fn streaming_mode_materializes_temp_file() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    for i in 0..500 {
        writeln!(tmp, "G1 X{} Y{} F500", i, i * 2).unwrap();
    }
    tmp.flush().unwrap();

    let options = LoadOptions {
        force_streaming: true,
        ..Default::default()
    };
    let loaded = load_job_from_path(tmp.path(), options).unwrap();
    assert!(loaded.stats.streaming);
    assert_eq!(loaded.job.len(), 500);

    match &loaded.job.source {
        JobSource::StreamingFile(file) => {
            assert!(file.path().exists());
        }
        other => panic!("expected streaming source, got {other:?}"),
    }

    // Random access and order both hold through the offset index.
    assert_eq!(loaded.job.get(0).unwrap().text, "G1X0Y0F500");
    assert_eq!(loaded.job.get(499).unwrap().text, "G1X499Y998F500");
    assert_eq!(loaded.job.get(42).unwrap().source_line, Some(43));
}

#[test]
fn resume_plan_works_over_streaming_source() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    writeln!(tmp, "G20").unwrap();
    writeln!(tmp, "G91").unwrap();
    writeln!(tmp, "G55").unwrap();
    writeln!(tmp, "M4 S9000").unwrap();
    writeln!(tmp, "G1 F320").unwrap();
    for i in 0..50 {
        writeln!(tmp, "G1 X{}", i).unwrap();
    }
    tmp.flush().unwrap();

    let options = LoadOptions {
        force_streaming: true,
        ..Default::default()
    };
    let loaded = load_job_from_path(tmp.path(), options).unwrap();
    let plan = build_resume_preamble(&loaded.job.source, 30);
    assert_eq!(plan.preamble, ["G20", "G91", "G55", "M4 S9000", "G1 F320"]);
    assert!(!plan.saw_g92);
}

#[test]
fn dollar_lines_reject_before_any_output() {
    let err = load_job_from_lines("G21\n$X\nG1 X0\n".lines(), LoadOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        simplesender_core::LoadError::SystemCommandInJob { line: 2, .. }
    ));
}
