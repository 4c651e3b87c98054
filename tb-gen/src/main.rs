//! Load generator for the ledger client.
//!
//! Generates random accounts (and optionally transfers between them) and
//! submits them concurrently from several tasks sharing one client, retrying
//! on backpressure.
//!
//! # Usage
//!
//! ```bash
//! # Create 10k accounts from 8 concurrent submitters
//! tb-gen --accounts 10000 --concurrency 8 --address 127.0.0.1:3000
//!
//! # Then move money between them
//! tb-gen --accounts 1000 --transfers 50000 --max-amount 500
//!
//! # Limit the packet pool and batch size
//! tb-gen --accounts 1000 --max-credits 4 --batch-size 100
//!
//! # Generate data without sending it
//! tb-gen --accounts 50 --dry-run
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;
use tb_client::{
    Account, AccountResult, Client, ClientError, Completion, Config, CreateAccountResult,
    CreateTransferResult, Transfer, TransferResult,
};
use tracing::{debug, info, warn};

/// Load generator for the ledger client
#[derive(Parser, Debug)]
#[command(name = "tb-gen")]
#[command(about = "Generate and submit ledger accounts", long_about = None)]
struct Args {
    /// Ledger server address
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    address: String,

    /// Cluster ID
    #[arg(short, long, default_value_t = 0)]
    cluster: u128,

    /// Number of accounts to create
    #[arg(long, default_value_t = 100)]
    accounts: u32,

    /// Ledger ID for all accounts
    #[arg(short, long, default_value_t = 1)]
    ledger: u32,

    /// Account code
    #[arg(long, default_value_t = 1)]
    code: u32,

    /// Number of transfers to create after the accounts
    #[arg(short, long, default_value_t = 0)]
    transfers: u32,

    /// Maximum transfer amount
    #[arg(long, default_value_t = 1000)]
    max_amount: u64,

    /// Records per batch (capped by the negotiated limit)
    #[arg(short, long, default_value_t = 8190)]
    batch_size: u32,

    /// Concurrent submitting tasks
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Requested in-flight limit (0 = server default)
    #[arg(long, default_value_t = 0)]
    max_credits: u32,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    request_timeout_ms: u64,

    /// Dry run - generate data but don't send to server
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Generate a batch of random accounts.
fn generate_accounts(count: u32, ledger: u32, code: u32) -> Vec<Account> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| Account {
            id: tb_client::id(),
            user_data: rng.random(),
            ledger,
            code,
            ..Default::default()
        })
        .collect()
}

/// Generate random transfers between distinct accounts.
fn generate_transfers(
    accounts: &[Account],
    count: u32,
    ledger: u32,
    code: u16,
    max_amount: u64,
) -> Vec<Transfer> {
    if accounts.len() < 2 {
        return Vec::new();
    }

    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let debit = rng.random_range(0..accounts.len());
            let mut credit = rng.random_range(0..accounts.len() - 1);
            if credit >= debit {
                credit += 1;
            }
            Transfer {
                id: tb_client::id(),
                debit_account_id: accounts[debit].id,
                credit_account_id: accounts[credit].id,
                amount: u128::from(rng.random_range(1..=max_amount.max(1))),
                ledger,
                code,
                ..Default::default()
            }
        })
        .collect()
}

/// A batch outcome the generator knows how to count.
trait Outcome {
    fn created(&self) -> bool;
    fn exists(&self) -> bool;
}

impl Outcome for AccountResult {
    fn created(&self) -> bool {
        self.is_ok()
    }

    fn exists(&self) -> bool {
        self.result == CreateAccountResult::Exists
    }
}

impl Outcome for TransferResult {
    fn created(&self) -> bool {
        self.is_ok()
    }

    fn exists(&self) -> bool {
        self.result == CreateTransferResult::Exists
    }
}

/// Per-batch counts.
#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    created: usize,
    /// Records applied by an earlier attempt of a resubmitted batch.
    already: usize,
    failed: usize,
}

/// Count a batch's results. After a resubmission `Exists` means an earlier
/// attempt was applied, not that the record collided with someone else's.
fn tally<R: Outcome>(results: &[R], resubmitted: bool) -> Tally {
    let mut tally = Tally::default();
    for result in results {
        if result.created() {
            tally.created += 1;
        } else if resubmitted && result.exists() {
            tally.already += 1;
        } else {
            tally.failed += 1;
        }
    }
    tally
}

/// Per-run counters shared by the submitting tasks.
#[derive(Default)]
struct Stats {
    created: AtomicUsize,
    already: AtomicUsize,
    failed: AtomicUsize,
    batches: AtomicUsize,
    backpressure: AtomicUsize,
    retried: AtomicUsize,
}

impl Stats {
    fn add(&self, tally: &Tally) {
        self.created.fetch_add(tally.created, Ordering::Relaxed);
        self.already.fetch_add(tally.already, Ordering::Relaxed);
        self.failed.fetch_add(tally.failed, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    fn print(&self, label: &str, elapsed: Duration) {
        let created = self.created.load(Ordering::Relaxed);
        println!();
        println!("{label}");
        println!("Batches:      {}", self.batches.load(Ordering::Relaxed));
        println!("Created:      {}", created);
        println!("Already:      {}", self.already.load(Ordering::Relaxed));
        println!("Failed:       {}", self.failed.load(Ordering::Relaxed));
        println!("Pool waits:   {}", self.backpressure.load(Ordering::Relaxed));
        println!("Resubmitted:  {}", self.retried.load(Ordering::Relaxed));
        println!(
            "Elapsed:      {:.2?} ({:.0}/s)",
            elapsed,
            created as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );
    }
}

/// Submit one chunk, retrying while the pool is full or the session reconnects.
async fn submit_chunk<R, S>(chunk_index: usize, stats: &Stats, submit: S) -> Result<(), ClientError>
where
    R: Outcome + std::fmt::Debug,
    S: Fn() -> Result<Completion<usize, Vec<R>>, ClientError>,
{
    let mut delay = Duration::from_millis(1);
    let mut resubmitted = false;
    loop {
        let completion = match submit() {
            Ok(completion) => completion,
            Err(ClientError::PoolExhausted) => {
                stats.backpressure.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_millis(50));
                continue;
            }
            Err(e) if e.is_transient() => {
                warn!(chunk = chunk_index, error = %e, "retrying batch");
                stats.retried.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        match completion.await {
            Ok(event) => {
                for result in event.results.iter().filter(|r| !r.created()) {
                    debug!(chunk = event.context, ?result, "record not created");
                }
                stats.add(&tally(&event.results, resubmitted));
                return Ok(());
            }
            // Cancelled or timed out requests may still have been applied;
            // resubmitting is safe because creation is idempotent per id.
            Err(e) if e.is_transient() => {
                warn!(chunk = chunk_index, error = %e, "resubmitting batch");
                stats.retried.fetch_add(1, Ordering::Relaxed);
                resubmitted = true;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Submit every chunk from `concurrency` tasks sharing `client`.
async fn submit_all<T, R>(
    client: &Arc<Client<usize>>,
    chunks: Vec<Vec<T>>,
    concurrency: usize,
    submit: fn(&Client<usize>, &[T], usize) -> Result<Completion<usize, Vec<R>>, ClientError>,
) -> Result<Arc<Stats>, Box<dyn std::error::Error>>
where
    T: Send + Sync + 'static,
    R: Outcome + std::fmt::Debug + Send + 'static,
{
    let chunks = Arc::new(chunks);
    let stats = Arc::new(Stats::default());
    let next = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..concurrency.max(1))
        .map(|_| {
            let client = Arc::clone(client);
            let chunks = Arc::clone(&chunks);
            let stats = Arc::clone(&stats);
            let next = Arc::clone(&next);
            tokio::spawn(async move {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(chunk) = chunks.get(index) else {
                        return Ok::<_, ClientError>(());
                    };
                    submit_chunk(index, &stats, || submit(&client, chunk, index)).await?;
                }
            })
        })
        .collect();

    for worker in workers {
        worker.await??;
    }
    Ok(stats)
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        address = %args.address,
        cluster = args.cluster,
        accounts = args.accounts,
        transfers = args.transfers,
        concurrency = args.concurrency,
        "starting"
    );

    if args.accounts == 0 {
        info!("no accounts to create");
        return Ok(());
    }

    let accounts = generate_accounts(args.accounts, args.ledger, args.code);
    info!(count = accounts.len(), "generated accounts");
    let transfers = generate_transfers(
        &accounts,
        args.transfers,
        args.ledger,
        u16::try_from(args.code)?,
        args.max_amount,
    );
    if !transfers.is_empty() {
        info!(count = transfers.len(), "generated transfers");
    }

    if args.dry_run {
        println!("Dry run mode - not sending to server");
        println!("Sample account: {:032x}", accounts[0].id);
        if let Some(transfer) = transfers.first() {
            println!(
                "Sample transfer: {:032x} -> {:032x} ({})",
                transfer.debit_account_id, transfer.credit_account_id, transfer.amount
            );
        }
        return Ok(());
    }

    let config = Config {
        max_credits: args.max_credits,
        max_debits: args.max_credits,
        ..Default::default()
    };
    let client: Client<usize> = Client::builder()
        .cluster(args.cluster)
        .address(&args.address)?
        .config(config)
        .request_timeout(Duration::from_millis(args.request_timeout_ms))
        .build()
        .await?;
    info!(
        client = format_args!("{:032x}", client.id()),
        packets = client.packet_capacity(),
        batch_limit = client.max_batch_count(),
        "connected"
    );

    let client = Arc::new(client);

    let batch_size = args.batch_size.clamp(1, client.max_batch_count()) as usize;
    let chunks = accounts.chunks(batch_size).map(<[Account]>::to_vec).collect();
    let started = Instant::now();
    let stats = submit_all(&client, chunks, args.concurrency, |client, chunk, index| {
        client.submit_with_context(chunk, index)
    })
    .await?;
    stats.print("Accounts", started.elapsed());

    if !transfers.is_empty() {
        let batch_size = args.batch_size.clamp(1, client.max_transfer_batch_count()) as usize;
        let chunks = transfers.chunks(batch_size).map(<[Transfer]>::to_vec).collect();
        let started = Instant::now();
        let stats = submit_all(&client, chunks, args.concurrency, |client, chunk, index| {
            client.submit_transfers(chunk, index)
        })
        .await?;
        stats.print("Transfers", started.elapsed());
    }

    // Spot-check a random sample.
    let mut rng = rand::rng();
    let sample: Vec<u128> = (0..accounts.len().min(10))
        .map(|_| accounts[rng.random_range(0..accounts.len())].id)
        .collect();
    let found = client.lookup_accounts(&sample).await?;
    println!("Lookup:       {}/{} sampled accounts found", found.len(), sample.len());

    client.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    run(args).await
}
