use std::io::Write;

use tracing::{debug, info};

use crate::error::AppResult;
use crate::runner::{LocalRunner, MasterRunner, WorkerRunner};
use crate::shutdown::ShutdownSender;
use crate::shutdown_handlers::{setup_signal_shutdown_handler, shutdown_channel};
use crate::stats::{ConsoleSink, StatsSink};
use crate::supervisor::ProcessSupervisor;
use crate::transport::{MasterEndpoint, ReadyMessage, WireMessage, encode_line, tcp};

use super::types::{ChildPlan, RunPlan, RunSetup};

pub(crate) async fn execute_plan(plan: RunPlan) -> AppResult<i32> {
    let (shutdown_tx, _shutdown_rx) = shutdown_channel();
    let signal_task = setup_signal_shutdown_handler(&shutdown_tx);
    debug!("Starting in {} mode", plan.mode());

    let result = match plan {
        RunPlan::Local(setup) => run_local(setup, &shutdown_tx).await,
        RunPlan::Master {
            setup,
            master,
            bind_addr,
            children,
        } => {
            let listener = tcp::bind(&bind_addr).await?;
            info!("Master listening on {}", bind_addr);
            let endpoint = MasterEndpoint::new();
            let server = tokio::spawn(tcp::serve(
                listener,
                endpoint.link_sender(),
                shutdown_tx.subscribe(),
            ));
            let runner = MasterRunner::new(
                setup.settings,
                master,
                setup.classes.specs(),
                setup.hooks,
                setup.shape,
                sinks(setup.only_summary),
                endpoint,
            )
            .with_class_source(setup.class_source);
            let result = match children {
                None => runner.run(shutdown_tx.subscribe()).await,
                Some(children) => {
                    let supervisor = supervisor(children)?;
                    let (master_result, children_result) = tokio::join!(
                        runner.run(shutdown_tx.subscribe()),
                        supervisor.run(shutdown_tx.subscribe())
                    );
                    combine(master_result, children_result)
                }
            };
            server.abort();
            result
        }
        RunPlan::Worker {
            setup,
            master_addr,
            child_process,
        } => {
            let endpoint = tcp::connect(&master_addr).await?;
            if child_process {
                announce_ready()?;
            }
            let runner = WorkerRunner::new(
                WorkerRunner::default_id(),
                setup.settings,
                setup.catalog,
                setup.classes,
                setup.hooks,
                endpoint,
            );
            runner.run(shutdown_tx.subscribe()).await
        }
        RunPlan::Supervisor(children) => {
            supervisor(children)?
                .run(shutdown_tx.subscribe())
                .await
        }
    };

    signal_task.abort();
    result
}

async fn run_local(setup: RunSetup, shutdown_tx: &ShutdownSender) -> AppResult<i32> {
    let runner = LocalRunner::new(
        setup.settings,
        setup.classes,
        setup.hooks,
        setup.shape,
        sinks(setup.only_summary),
    );
    runner.run(shutdown_tx.subscribe()).await
}

fn sinks(only_summary: bool) -> Vec<Box<dyn StatsSink>> {
    vec![Box::new(ConsoleSink::stderr(only_summary))]
}

fn supervisor(children: ChildPlan) -> AppResult<ProcessSupervisor> {
    ProcessSupervisor::for_current_exe(children.args, children.count)
}

/// The master's failure wins; otherwise the children's.
fn combine(master: AppResult<i32>, children: AppResult<i32>) -> AppResult<i32> {
    let master_code = master?;
    let children_code = children?;
    Ok(if master_code == 0 {
        children_code
    } else {
        master_code
    })
}

/// Tells the supervising parent on stdout that startup succeeded.
fn announce_ready() -> AppResult<()> {
    let line = encode_line(&WireMessage::Ready(ReadyMessage {
        pid: std::process::id(),
    }))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
