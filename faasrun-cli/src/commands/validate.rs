// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `faasrun validate` command - Validate configuration file.

use faasrun_core::{Config, ConfigLoader};

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            print!("{}", summary(&config));
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

fn summary(config: &Config) -> String {
    format!(
        "Server:\n\
         \x20 Port:               {}\n\
         \x20 Read Timeout:       {}s\n\
         \x20 Write Timeout:      {}s\n\
         \n\
         Runtime:\n\
         \x20 Namespace:          {}\n\
         \x20 Default Registry:   {}\n\
         \x20 State Directory:    {}\n\
         \x20 Poll Interval:      {}ms\n\
         \n\
         Deployments:\n\
         \x20 Supervision Window: {}s (max {}s)\n\
         \x20 Termination Signal: {}\n\
         \x20 Kill Grace:         {}s\n",
        config.server.port,
        config.server.read_timeout.as_secs(),
        config.server.write_timeout.as_secs(),
        config.runtime.namespace,
        config.runtime.default_registry,
        config.runtime.state_dir.display(),
        config.runtime.poll_interval.as_millis(),
        config.deploy.supervision_window.as_secs(),
        config.deploy.max_supervision_window.as_secs(),
        config.deploy.termination_signal,
        config.deploy.kill_grace.as_secs(),
    )
}
