//! stairway-demo: a minimal end-to-end run of the workflow engine.
//!
//! Registers a one-step flight that writes `text` to `filename`, submits it
//! against a real Postgres-backed engine, and polls until it reaches a
//! terminal status — the happy-path scenario from the engine's testable
//! properties.

use std::sync::Arc;
use std::time::Duration;

use stairway_core::{CompositeHook, EngineResult, FlightContext, FlightFactory, NoRetry, ParameterMap, Step, StepResult};
use stairway_engine::{EngineBuilder, EngineConfig};
use stairway_persistence::{build_dev_pool_from_env, PgFlightDao, PoolProvider};

struct WriteFileStep;

impl Step for WriteFileStep {
    fn class_name(&self) -> &str {
        "WriteFileStep"
    }

    fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let filename: String = match ctx.inputs.get("filename") {
            Ok(v) => v,
            Err(e) => return StepResult::FailureFatal(e.to_string()),
        };
        let text: String = match ctx.inputs.get("text") {
            Ok(v) => v,
            Err(e) => return StepResult::FailureFatal(e.to_string()),
        };
        match std::fs::write(&filename, &text) {
            Ok(()) => {
                if ctx.working_map.put("filename", &filename).is_err() {
                    return StepResult::FailureFatal("could not record written filename".into());
                }
                StepResult::Success
            }
            Err(e) => StepResult::FailureRetry(format!("writing {filename}: {e}")),
        }
    }

    fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        if let Ok(filename) = ctx.working_map.get::<String>("filename") {
            let _ = std::fs::remove_file(filename);
        }
        StepResult::Success
    }
}

fn write_file_flight_factory() -> FlightFactory {
    let mut factory = FlightFactory::new();
    factory.register("WriteFileFlight", Arc::new(|_inputs: &ParameterMap| {
        Ok(vec![(Box::new(WriteFileStep) as Box<dyn stairway_core::Step>, Box::new(NoRetry) as Box<dyn stairway_core::RetryRule>)])
    }));
    factory
}

fn main() -> EngineResult<()> {
    env_logger::init();

    let pool = match build_dev_pool_from_env() {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("stairway-demo: could not connect to Postgres ({e}); set DATABASE_URL and retry");
            return Ok(());
        }
    };
    let dao: Arc<dyn stairway_persistence::FlightDao> = Arc::new(PgFlightDao::new(PoolProvider { pool }));

    let config = EngineConfig { instance_name: "stairway-demo".into(), max_parallel_flights: 4, ..EngineConfig::default() };
    let builder = EngineBuilder::construct(config, write_file_flight_factory(), CompositeHook::new(), None);
    let (engine, _existing_instances) = builder.initialize(dao)?;
    engine.recover_and_start(&[])?;

    let mut inputs = ParameterMap::new();
    inputs.put("filename", &"/tmp/stairway-demo.txt".to_string())?;
    inputs.put("text", &"testing 1 2 3".to_string())?;

    let flight_id = engine.submit(None, "WriteFileFlight", inputs, false)?;
    println!("submitted flight {flight_id}");

    let terminal = engine.wait_for_flight(&flight_id, Duration::from_secs(30))?;

    println!("flight {flight_id} terminated with status {:?}", terminal.status);
    if let Some(output) = &terminal.output_parameters {
        println!("output parameters: {output}");
    }

    engine.quiet_down(Duration::from_secs(5));
    Ok(())
}
