// Copyright 2024 The SnowFS Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod add;
mod branch;
mod checkout;
mod commit;
mod diff;
mod init;
mod log;
mod rm;
mod status;

use std::process::ExitCode;

use clap::Parser as _;

use crate::cli_util;

/// SnowFS: snapshots for large binary assets.
#[derive(clap::Parser, Debug)]
#[command(name = "snow", version, about, disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    Init(init::InitArgs),
    Add(add::AddArgs),
    Rm(rm::RmArgs),
    Commit(commit::CommitArgs),
    Status(status::StatusArgs),
    Log(log::LogArgs),
    Checkout(checkout::CheckoutArgs),
    Branch(branch::BranchArgs),
    Diff(diff::DiffArgs),
}

pub fn dispatch() -> ExitCode {
    cli_util::init_tracing();
    cli_util::print_banner();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            use clap::error::ErrorKind;
            let displayed = matches!(
                error.kind(),
                ErrorKind::DisplayHelp
                    | ErrorKind::DisplayVersion
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            );
            let _ = error.print();
            return if displayed {
                ExitCode::SUCCESS
            } else {
                // Bad flags and arguments are user errors.
                ExitCode::from(1)
            };
        }
    };

    let result = match cli.command {
        Command::Init(args) => init::run(&args),
        Command::Add(args) => add::run(&args),
        Command::Rm(args) => rm::run(&args),
        Command::Commit(args) => commit::run(&args),
        Command::Status(args) => status::run(&args),
        Command::Log(args) => log::run(&args),
        Command::Checkout(args) => checkout::run(&args),
        Command::Branch(args) => branch::run(&args),
        Command::Diff(args) => diff::run(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            if error.is_user_error() {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}
