use pikarr::{Config, run};

fn main() -> anyhow::Result<()> {
    let worker_threads = Config::runtime_worker_threads();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("pikarr-worker");

    if worker_threads > 0 {
        builder.worker_threads(worker_threads);
    }

    builder.build()?.block_on(run())
}
