use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use pagespace_core::{
    page_file_path, resource_file_path, ConfigError, ExportConfig, ExportRun, ExportSummary,
    PhaseError, RunPhase,
};
use pagespace_logging::{ps_debug, ps_error, ps_info, ps_warn};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::sink::{clean_output_dir, CleanOutcome};
use crate::{
    ApiError, ByteStream, ClientSettings, ContentClient, FetchError, FetchedPage, FileSink,
    PageDescriptor, PageTransformer, ReqwestContentClient, ResourceFetch, WriteError,
};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up content client: {0}")]
    Client(FetchError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not clean output dir {path:?}: {source}")]
    Clean { path: PathBuf, source: io::Error },
    #[error("worker pool closed unexpectedly")]
    WorkerPool,
    #[error(transparent)]
    Phase(#[from] PhaseError),
}

/// Why a single page was skipped.
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("page url {0:?} has no output file")]
    Unmappable(String),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("page worker failed: {0}")]
    Worker(String),
}

/// Why a single resource was skipped.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("resource {0:?} has no output file")]
    Unmappable(String),
    #[error("resource unavailable (http status {0})")]
    Unavailable(u16),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Validate `config` and run a full export against the real content host.
/// Cancelling `cancel` winds the run down early (see [`Exporter::with_cancellation`]).
pub async fn export(
    config: &ExportConfig,
    settings: ClientSettings,
    cancel: CancellationToken,
) -> Result<ExportSummary, ExportError> {
    let run = config.validate()?;
    let client =
        ReqwestContentClient::new(run.host.clone(), run.credentials.clone(), settings)
            .map_err(ExportError::Client)?;
    Exporter::new(run, Arc::new(client))
        .with_cancellation(cancel)
        .run()
        .await
}

/// Drives one export: list pages, render them in parallel, then fetch every
/// distinct resource they reference in parallel.
pub struct Exporter {
    run: ExportRun,
    client: Arc<dyn ContentClient>,
    transformer: PageTransformer,
    sink: FileSink,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct RenderOutcome {
    exported: usize,
    skipped: usize,
    resources: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct FetchOutcome {
    fetched: usize,
    skipped: usize,
}

impl Exporter {
    pub fn new(run: ExportRun, client: Arc<dyn ContentClient>) -> Self {
        let sink = FileSink::new(run.output_dir.clone());
        Self {
            run,
            client,
            transformer: PageTransformer,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the token stops items that have not started and aborts
    /// in-flight fetches; both are counted as skipped.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self) -> Result<ExportSummary, ExportError> {
        ps_info!("Generating static site...");
        let mut phase = RunPhase::Configuring;

        match self.sink.root() {
            None => ps_warn!("No output directory given. Performing a dry run..."),
            Some(root) => {
                if let Err(err) = self.prepare_output() {
                    log_failure(phase, &err)?;
                    return Err(err);
                }
                ps_debug!("Writing output to {:?}", root);
            }
        }

        phase = enter(phase)?;
        let pages = match self.client.list_pages().await {
            Ok(pages) => pages,
            Err(err) => {
                let err = ExportError::from(err);
                log_failure(phase, &err)?;
                return Err(err);
            }
        };
        ps_info!("Found {} pages", pages.len());
        let pages_listed = pages.len();

        phase = enter(phase)?;
        let rendered = self.render_pages(pages).await?;

        phase = enter(phase)?;
        ps_info!("Fetching local static resources");
        let fetched = self.fetch_resources(&rendered.resources).await?;

        enter(phase)?;
        let summary = ExportSummary {
            dry_run: self.sink.is_dry_run(),
            pages_listed,
            pages_exported: rendered.exported,
            pages_skipped: rendered.skipped,
            resources_discovered: rendered.resources.len(),
            resources_fetched: fetched.fetched,
            resources_skipped: fetched.skipped,
            elapsed: self.run.started_at.elapsed(),
        };
        if summary.is_complete() {
            ps_info!("Static site generation complete: {}", summary);
        } else {
            ps_warn!("Static site generation completed with skipped items: {}", summary);
        }
        Ok(summary)
    }

    fn prepare_output(&self) -> Result<(), ExportError> {
        let Some(dir) = self.run.dir_to_clean() else {
            return Ok(());
        };
        ps_info!("Cleaning output dir: {:?}", dir);
        match clean_output_dir(dir, &self.run.source_dir) {
            Ok(CleanOutcome::Removed) | Ok(CleanOutcome::Missing) => Ok(()),
            Ok(CleanOutcome::Refused) => {
                ps_warn!(
                    "Not cleaning {:?}: it contains the source directory {:?}",
                    dir,
                    self.run.source_dir
                );
                Ok(())
            }
            Err(source) => Err(ExportError::Clean {
                path: dir.clone(),
                source,
            }),
        }
    }

    async fn render_pages(
        &self,
        pages: Vec<PageDescriptor>,
    ) -> Result<RenderOutcome, ExportError> {
        let mut outcome = RenderOutcome::default();
        let (pages, duplicates) = one_writer_per_file(
            pages,
            |page| page_file_path(&page.url),
            |page| page.url.as_str(),
        );
        outcome.skipped += duplicates;
        let mut tasks = self.run_pool(pages, |page, ctx| async move {
            let result = render_page(&ctx, &page).await;
            (page, result)
        })
        .await?;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(resources))) => {
                    outcome.exported += 1;
                    outcome.resources.extend(resources);
                }
                Ok((page, Err(err))) => {
                    ps_warn!("Skipping page {} ({}): {}", page.url, page.name, err);
                    outcome.skipped += 1;
                }
                Err(err) => {
                    ps_warn!("Page worker did not finish: {}", err);
                    outcome.skipped += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn fetch_resources(
        &self,
        resources: &BTreeSet<String>,
    ) -> Result<FetchOutcome, ExportError> {
        ps_debug!(
            "Found resources:\n{}",
            resources.iter().cloned().collect::<Vec<_>>().join("\n")
        );
        if self.sink.is_dry_run() {
            ps_info!("No resources fetched on dry run");
            return Ok(FetchOutcome::default());
        }

        let mut outcome = FetchOutcome::default();
        let (references, duplicates) = one_writer_per_file(
            resources.iter().cloned(),
            |reference| resource_file_path(reference),
            String::as_str,
        );
        outcome.skipped += duplicates;
        let mut tasks = self.run_pool(references, |reference, ctx| async move {
            let result = fetch_resource(&ctx, &reference).await;
            (reference, result)
        })
        .await?;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((reference, Ok(bytes))) => {
                    ps_debug!("Fetched {} ({} bytes)", reference, bytes);
                    outcome.fetched += 1;
                }
                Ok((reference, Err(err))) => {
                    ps_warn!("Skipping resource {}: {}", reference, err);
                    outcome.skipped += 1;
                }
                Err(err) => {
                    ps_warn!("Resource worker did not finish: {}", err);
                    outcome.skipped += 1;
                }
            }
        }
        ps_info!("All resources fetched");
        Ok(outcome)
    }

    /// Spawn one task per item, at most `concurrency` running at once.
    async fn run_pool<I, F, Fut>(
        &self,
        items: Vec<I>,
        work: F,
    ) -> Result<JoinSet<Fut::Output>, ExportError>
    where
        I: Send + 'static,
        F: Fn(I, WorkerContext) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.run.concurrency));
        let mut tasks = JoinSet::new();
        for item in items {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ExportError::WorkerPool)?;
            let task = work(item, self.worker_context());
            tasks.spawn(async move {
                let _permit = permit;
                task.await
            });
        }
        Ok(tasks)
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            client: Arc::clone(&self.client),
            transformer: self.transformer,
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Keep the first item for each output file and drop the rest, so no two
/// workers ever write the same path. Unmappable items are kept; their worker
/// reports them. Returns the kept items and the number dropped.
fn one_writer_per_file<T>(
    items: impl IntoIterator<Item = T>,
    output_path: impl Fn(&T) -> Option<PathBuf>,
    name: impl Fn(&T) -> &str,
) -> (Vec<T>, usize) {
    let mut owners: HashMap<PathBuf, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::new();
    let mut dropped = 0;
    for item in items {
        if let Some(path) = output_path(&item) {
            if let Some(&owner) = owners.get(&path) {
                ps_warn!(
                    "Skipping {}: {} already writes {:?}",
                    name(&item),
                    name(&kept[owner]),
                    path
                );
                dropped += 1;
                continue;
            }
            owners.insert(path, kept.len());
        }
        kept.push(item);
    }
    (kept, dropped)
}

fn enter(phase: RunPhase) -> Result<RunPhase, ExportError> {
    let next = phase.advance()?;
    ps_debug!("Run phase {:?} -> {:?}", phase, next);
    Ok(next)
}

fn log_failure(phase: RunPhase, err: &ExportError) -> Result<(), ExportError> {
    let failed = phase.fail()?;
    ps_error!("Export {:?} while {:?}: {}", failed, phase, err);
    Ok(())
}

/// What a worker task needs, owned so the task can be spawned.
struct WorkerContext {
    client: Arc<dyn ContentClient>,
    transformer: PageTransformer,
    sink: FileSink,
    cancel: CancellationToken,
}

async fn render_page(
    ctx: &WorkerContext,
    page: &PageDescriptor,
) -> Result<BTreeSet<String>, PageError> {
    ps_info!("Fetching content for page {} ({})", page.url, page.name);
    let fetched = cancellable(&ctx.cancel, ctx.client.fetch_page(&page.url)).await??;

    ps_info!("Processing page {}", page.url);
    let transformer = ctx.transformer;
    let sink = ctx.sink.clone();
    tokio::task::spawn_blocking(move || persist_page(transformer, &sink, &fetched))
        .await
        .map_err(|err| PageError::Worker(err.to_string()))?
}

fn persist_page(
    transformer: PageTransformer,
    sink: &FileSink,
    page: &FetchedPage,
) -> Result<BTreeSet<String>, PageError> {
    let result = transformer.transform_page(page);
    if sink.is_dry_run() {
        ps_debug!("No files written on dry run ({})", page.url);
        return Ok(result.resources);
    }
    let relative =
        page_file_path(&page.url).ok_or_else(|| PageError::Unmappable(page.url.clone()))?;
    sink.write(&relative, result.html.as_bytes())?;
    Ok(result.resources)
}

async fn fetch_resource(ctx: &WorkerContext, reference: &str) -> Result<u64, ResourceError> {
    let relative = resource_file_path(reference)
        .ok_or_else(|| ResourceError::Unmappable(reference.to_string()))?;

    let body = match cancellable(&ctx.cancel, ctx.client.fetch_resource(reference)).await?? {
        ResourceFetch::Available(body) => body,
        ResourceFetch::Unavailable { status } => return Err(ResourceError::Unavailable(status)),
    };

    let written = ctx
        .sink
        .write_stream(&relative, until_cancelled(body, ctx.cancel.clone()))
        .await?;
    Ok(written.unwrap_or(0))
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = T>,
) -> Result<T, FetchError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::cancelled()),
        result = work => Ok(result),
    }
}

/// Ends the body with a cancellation error as soon as `cancel` fires, so the
/// sink discards the partial file.
fn until_cancelled(body: ByteStream, cancel: CancellationToken) -> ByteStream {
    stream::unfold(Some((body, cancel)), |state| async move {
        let (mut body, cancel) = state?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some((Err(FetchError::cancelled()), None)),
            next = body.next() => next.map(|chunk| (chunk, Some((body, cancel)))),
        }
    })
    .boxed()
}
