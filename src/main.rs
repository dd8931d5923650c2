use overlay_node::config::args;
use overlay_node::node;

fn main() {
    let args = args().run();

    overlay_node::log_init(
        args.quiet,
        #[cfg(feature = "systemd")]
        false,
    );

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    runtime.block_on(async move {
        let role = node::resolve_role(&args).await;
        if let Err(e) = node::run(args, role).await {
            tracing::error!(error = %e, "node exited with an error");
            std::process::exit(1);
        }
    });
}
