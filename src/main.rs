use std::process::ExitCode;

use clap::Parser;

use fountain_provision::{Args, fake_transport_backend_from_args, real_transport_backend, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let options = args.run_options();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let backend = match maybe_fake_args {
            Some(fake_args) => fake_transport_backend_from_args(fake_args, options.wire_encoding()),
            None => real_transport_backend(),
        };

        run(command, &options, &mut stdout, backend).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
