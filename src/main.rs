use clap::Parser;
use serde::Serialize;

use vagrant_fleet::cli::Cli;
use vagrant_fleet::error::{FleetError, ProcessErrorDetails};
use vagrant_fleet::logging;
use vagrant_fleet::orchestrator::{Fleet, OperationResult};

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ProcessErrorDetails>,
}

fn main() -> Result<(), FleetError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = run(&cli);
    match result {
        Ok(payload) => output(cli.json, &payload),
        Err(err) => {
            tracing::debug!(error = %err, "invocation failed");
            if cli.json {
                let payload = JsonResult::<OperationResult> {
                    ok: false,
                    result: None,
                    error: Some(err.to_string()),
                    error_details: err.process_details().cloned(),
                };
                print_json(&payload)?;
            } else {
                eprintln!("{err}");
            }
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<OperationResult, FleetError> {
    let invocation = cli.params()?.resolve()?;
    let settings = cli.settings()?;
    tracing::debug!(
        operation = ?invocation.operation,
        vm_name = %invocation.vm_name,
        workdir = %settings.layout.root.display(),
        "invocation"
    );
    let fleet = Fleet::from_settings(&settings, invocation.options);
    fleet.run(&invocation)
}

fn output(json: bool, payload: &OperationResult) -> Result<(), FleetError> {
    if json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
            error_details: None,
        };
        print_json(&wrapper)
    } else {
        print_json(payload)
    }
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), FleetError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
