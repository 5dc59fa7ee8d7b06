//! Flow-control properties checked over randomized schedules.
//!
//! A deterministic LCG drives interleavings of dispatch, acks, and Bf
//! reports; the window invariant, ack conservation, and the line policy
//! must hold at every step.

mod common;

use common::MockLink;

use simplesender_communication::GrblController;
use simplesender_core::types::StreamState;
use simplesender_gcode::{load_job_from_lines, LoadOptions};

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

fn random_job(rng: &mut Lcg, lines: usize) -> String {
    let mut out = String::new();
    for i in 0..lines {
        match rng.below(5) {
            0 => out.push_str(&format!("G0 X{} Y{}\n", rng.below(300), rng.below(300))),
            1 => out.push_str(&format!(
                "G1 X{}.{} Y{}.{} F{}\n",
                rng.below(200),
                rng.below(1000),
                rng.below(200),
                rng.below(1000),
                100 + rng.below(900)
            )),
            2 => out.push_str(&format!("G1 Z-{}.{}\n", rng.below(10), rng.below(100))),
            3 => out.push_str("G4 P0.1\n"),
            _ => out.push_str(&format!("G1 X{} ; pass {}\n", rng.below(500), i)),
        }
    }
    out
}

#[test]
fn window_invariant_over_random_schedules() {
    for seed in 1..=8u64 {
        let mut rng = Lcg(seed);
        let (link, captured, feeder) = MockLink::new();
        let (ctl, _events) = GrblController::new(link);

        let gcode = random_job(&mut rng, 200);
        let loaded = load_job_from_lines(gcode.lines(), LoadOptions::default()).expect("load");
        let total = loaded.job.len();
        ctl.load_job(loaded.job).expect("arm");
        ctl.start_stream().expect("start");

        let mut answered = 0usize;
        let mut oks_sent = 0usize;
        let mut guard = 0usize;
        while ctl.stream_state() != StreamState::Idle {
            guard += 1;
            assert!(guard < 1_000_000, "seed {seed}: did not converge");

            match rng.below(4) {
                0 => {
                    ctl.pump_tx_once();
                }
                1 => {
                    // Ack a random slice of the outstanding lines.
                    let outstanding = captured.line_count() - answered;
                    if outstanding > 0 {
                        let n = 1 + rng.below(outstanding as u64) as usize;
                        answered += n;
                        oks_sent += n;
                        feeder.push_ok(n);
                    }
                }
                2 => {
                    // Status with a random Bf availability.
                    let avail = 40 + rng.below(200);
                    feeder.push_line(&format!(
                        "<Run|MPos:0.000,0.000,0.000|Bf:{},15>",
                        avail
                    ));
                }
                _ => {
                    while ctl.pump_rx_once() {}
                }
            }

            // The character counter never exceeds the window.
            assert!(
                ctl.rx_in_flight() <= ctl.rx_window(),
                "seed {seed}: {} in flight > window {}",
                ctl.rx_in_flight(),
                ctl.rx_window()
            );
            assert!(ctl.rx_window() >= 64, "window fell through the floor");
        }
        while ctl.pump_rx_once() {}

        // Ack conservation: exactly one pop per ok, nothing left over.
        assert_eq!(captured.line_count(), total, "seed {seed}");
        assert!(oks_sent >= total, "seed {seed}");
        assert_eq!(ctl.pending_count(), 0, "seed {seed}");

        // Line policy on everything that reached the wire.
        for line in captured.lines() {
            assert!(line.len() + 1 <= 80, "seed {seed}: {line}");
            assert!(line.is_ascii(), "seed {seed}: {line}");
        }
    }
}

#[test]
fn bf_window_floor_and_growth() {
    let (link, _captured, feeder) = MockLink::new();
    let (ctl, _events) = GrblController::new(link);

    // Quiet link: tiny availability clamps to the floor, big reports grow
    // past the default cap.
    feeder.push_line("<Idle|MPos:0.000,0.000,0.000|Bf:10,15>");
    while ctl.pump_rx_once() {}
    assert_eq!(ctl.rx_window(), 64);

    feeder.push_line("<Idle|MPos:0.000,0.000,0.000|Bf:255,15>");
    while ctl.pump_rx_once() {}
    assert_eq!(ctl.rx_window(), 255);

    feeder.push_line("<Idle|MPos:0.000,0.000,0.000|Bf:120,15>");
    while ctl.pump_rx_once() {}
    assert_eq!(ctl.rx_window(), 120);
}

#[test]
fn auto_pause_exactly_on_directive_ack() {
    for directive in ["M0", "M1", "M6"] {
        let (link, captured, feeder) = MockLink::new();
        let (ctl, _events) = GrblController::new(link);

        let gcode = format!("G1 X1 F100\n{}\nG1 X2\n", directive);
        let loaded = load_job_from_lines(gcode.lines(), LoadOptions::default()).expect("load");
        ctl.load_job(loaded.job).expect("arm");
        ctl.start_stream().expect("start");
        ctl.pump_tx_once();

        // The directive and its predecessor go out; nothing beyond.
        assert_eq!(captured.line_count(), 2);

        // Ack of the first line does not pause.
        feeder.push_ok(1);
        while ctl.pump_rx_once() {}
        assert_eq!(ctl.stream_state(), StreamState::Running);

        // Ack of the directive pauses exactly then.
        feeder.push_ok(1);
        while ctl.pump_rx_once() {}
        assert_eq!(ctl.stream_state(), StreamState::Paused, "{directive}");
    }
}
