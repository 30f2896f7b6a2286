use anyhow::Result;
use operant_core::{Trial, TrialAction};
use operant_engine::{DeviceCalibration, RecordingPositioner, TaskEngine, config};
use operant_timing::MonotonicClock;

mod sim;
use sim::RigSimulator;

/// Samples kept after the hit window closes before a trial is booked.
const POST_WINDOW_SAMPLES: usize = 50;
/// Rolling signal buffer length, in samples.
const BUFFER_LEN: usize = 1000;

fn execute(action: TrialAction) {
    match action {
        TrialAction::TriggerFeeder => println!("  >> feeder triggered"),
        TrialAction::SendStimulationTrigger => println!("  >> stimulation trigger sent"),
    }
}

fn main() -> Result<()> {
    let (stage, model) = config::static_pull();
    let mut engine = TaskEngine::new(stage, model, MonotonicClock::new());
    let mut positioner = RecordingPositioner::default();
    engine.begin_session(&[], &mut positioner);

    println!("Stage: {}", engine.stage.name);
    for (name, parameter) in &engine.stage.parameters {
        println!(
            "  {}: {} {} [{} .. {}]",
            name, parameter.current, parameter.units, parameter.minimum, parameter.maximum
        );
    }

    let calibration = DeviceCalibration::new(1.0 / 2.0, f64::from(sim::BASELINE_TICKS));
    let mut rig = RigSimulator::new();
    let mut signal: Vec<Vec<f64>> = vec![Vec::new(); 3];
    let mut open_trial: Option<Trial> = None;

    for _ in 0..20_000 {
        let raw = rig.next_batch();
        let batch = engine.transform_batch(&raw, calibration);
        let fresh = batch.get(1).map_or(0, Vec::len);
        for (channel, samples) in signal.iter_mut().zip(&batch) {
            channel.extend_from_slice(samples);
            if channel.len() > BUFFER_LEN {
                channel.drain(..channel.len() - BUFFER_LEN);
            }
        }

        match open_trial.as_mut() {
            None => {
                if let Some(index) = engine.check_initiation(&signal, fresh, &mut positioner) {
                    let context = index.saturating_sub(engine.stage.samples_before_window);
                    let mut trial = engine.open_trial(signal.len(), index - context);
                    let seed: Vec<Vec<f64>> = signal
                        .iter()
                        .map(|c| c[context.min(c.len())..].to_vec())
                        .collect();
                    trial.extend(&seed);
                    open_trial = Some(trial);
                }
            }
            Some(trial) => {
                trial.extend(&batch);
                engine.evaluate_trial(trial);
                for action in engine.react(trial) {
                    execute(action);
                }

                let record_len = engine.stage.hit_window().end + POST_WINDOW_SAMPLES;
                if trial.device_signal().len() >= record_len {
                    engine.close_trial(trial);
                    let message = engine.finish_trial(trial, &mut positioner);
                    println!("{message}");
                    open_trial = None;
                }
            }
        }

        if let Some(action) = engine.poll_scheduled() {
            execute(action);
        }
    }

    for line in engine.end_of_session_messages() {
        println!("{line}");
    }
    let summary = engine.session_summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
