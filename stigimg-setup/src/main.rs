//! stigimg-setup: prepares a cloud project for STIG image builds.
//!
//! - apply: reconcile network, service account, keys, buckets, repository and IAM
//! - plan: print the ordered steps without touching anything
//! - build: hand the configuration to the Cloud Build image pipeline
//! - reports: check the scan artifacts uploaded for an image

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use stigimg_setup::config::DEFAULT_ZONE;
use stigimg_setup::pipeline::{self, BuildRequest};
use stigimg_setup::{
    CloudProvider, ConfigError, ConfigInputs, Configuration, GcloudProvider, Plan, Reconciler,
    prompt,
};

#[derive(Parser)]
#[command(name = "stigimg-setup", version)]
#[command(about = "Prepare a GCP project for building STIG-hardened RHEL 8 images")]
struct Cli {
    /// Target project ID
    #[arg(long, env = "PROJECT_ID", global = true)]
    project_id: Option<String>,

    /// Zone for the build VM
    #[arg(long, env = "ZONE", global = true, default_value = DEFAULT_ZONE)]
    zone: String,

    /// Region (derived from the zone when unset)
    #[arg(long, env = "REGION", global = true)]
    region: Option<String>,

    /// Artifact bucket (default: <project>-stig-artifacts)
    #[arg(long, env = "BUCKET_NAME", global = true)]
    bucket_name: Option<String>,

    /// Cloud Build bucket (default: <project>_cloudbuild)
    #[arg(long, env = "CLOUDBUILD_BUCKET", global = true)]
    cloudbuild_bucket: Option<String>,

    /// Project number (looked up when unset)
    #[arg(long, env = "PROJECT_NUMBER", global = true)]
    project_number: Option<String>,

    /// gcloud binary
    #[arg(long, env = "GCLOUD_BIN", global = true, default_value = "gcloud")]
    gcloud: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing resources and apply IAM bindings (default)
    Apply {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the ordered steps without running them
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Submit the image build to Cloud Build
    Build {
        /// Cloud Build config file
        #[arg(long, default_value = "cloudbuild.yaml")]
        config: PathBuf,

        /// Source directory uploaded with the build
        #[arg(long, default_value = ".")]
        source: PathBuf,

        /// Name of the image to produce (default: rhel-8-stig-<timestamp>)
        #[arg(long, env = "IMAGE_NAME")]
        image_name: Option<String>,
    },

    /// List the compliance scan artifacts for an image
    Reports {
        /// Image name the scan ran against
        image_name: String,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn inputs(&self) -> ConfigInputs {
        ConfigInputs {
            project_id: self.project_id.clone(),
            zone: Some(self.zone.clone()),
            region: self.region.clone(),
            bucket_name: self.bucket_name.clone(),
            cloudbuild_bucket: self.cloudbuild_bucket.clone(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "stigimg_setup=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut inputs = cli.inputs();
    if inputs.project_id().is_none() && prompt::is_interactive() {
        inputs.project_id = prompt::ask("GCP project ID")
            .await
            .context("Failed to read project ID")?;
    }
    let project_id = inputs
        .project_id()
        .ok_or(ConfigError::MissingProjectId)?
        .to_string();

    let gcloud = GcloudProvider::new(cli.gcloud.clone(), project_id.clone());

    // Looked up once; read-only for the rest of the run
    let project_number = match &cli.project_number {
        Some(number) => number.clone(),
        None => gcloud
            .project_number(&project_id)
            .await
            .with_context(|| format!("Failed to look up project number for {}", project_id))?,
    };
    let config = inputs.resolve(&project_number)?;

    match cli.command.unwrap_or(Commands::Apply {
        yes: false,
        json: false,
    }) {
        Commands::Apply { yes, json } => apply(gcloud, &config, yes, json).await,
        Commands::Plan { json } => show_plan(&config, json),
        Commands::Build {
            config: config_file,
            source,
            image_name,
        } => {
            let request = BuildRequest {
                source_dir: source,
                config_file,
                image_name: image_name
                    .unwrap_or_else(|| pipeline::default_image_name(chrono::Utc::now())),
            };
            let output = pipeline::submit_build(&gcloud, &config, &request)
                .await
                .context("Image build failed")?;
            if !output.is_empty() {
                println!("{}", output);
            }
            info!(
                image = %request.image_name,
                reports = %pipeline::scan_prefix(&config, &request.image_name),
                "Build finished"
            );
            Ok(())
        }
        Commands::Reports { image_name, json } => {
            let artifacts = pipeline::list_scan_artifacts(&gcloud, &config, &image_name)
                .await
                .context("Failed to list scan artifacts")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&artifacts)?);
            } else {
                println!("{}", pipeline::scan_prefix(&config, &image_name));
                for (label, uri) in [
                    ("html report", &artifacts.report_html),
                    ("xml results", &artifacts.results_xml),
                    ("log", &artifacts.log),
                ] {
                    match uri {
                        Some(uri) => println!("  {:<12} {}", label, uri.green()),
                        None => println!("  {:<12} {}", label, "missing".red()),
                    }
                }
            }
            if !artifacts.is_complete() {
                bail!("Scan artifacts incomplete: missing {}", artifacts.missing().join(", "));
            }
            Ok(())
        }
    }
}

fn print_config(config: &Configuration) {
    println!("{}", "Configuration".bold());
    println!("  project:           {} ({})", config.project_id, config.project_number);
    println!("  zone:              {}", config.zone);
    println!("  region:            {}", config.region);
    println!("  bucket:            {}", config.bucket_name);
    println!("  cloudbuild bucket: {}", config.cloudbuild_bucket);
}

async fn apply(gcloud: GcloudProvider, config: &Configuration, yes: bool, json: bool) -> Result<()> {
    if !yes {
        print_config(config);
    }
    prompt::require_confirmation(yes, prompt::is_interactive(), || prompt::confirm("Proceed?"))
        .await?;

    info!(project = %config.project_id, region = %config.region, "Reconciling project");

    let reconciler = Reconciler::new(gcloud);
    let report = reconciler.run(config).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }

    match report.failure() {
        Some(err) => Err(anyhow!(err.clone()).context("Reconciliation failed")),
        None => Ok(()),
    }
}

fn show_plan(config: &Configuration, json: bool) -> Result<()> {
    let plan = Plan::for_config(config);
    plan.validate(&config.project_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_config(config);
    println!();
    for (i, step) in plan.steps().iter().enumerate() {
        println!("{:>3}. {}", i + 1, step);
    }
    Ok(())
}
