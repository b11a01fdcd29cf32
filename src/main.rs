use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use txstage::entity::{expect_i64, expect_text};
use txstage::{
    CommitResult, Criteria, DataType, DomainEvent, Entity, EntityDescriptor, MemoryEventSink,
    MemoryStore, Modification, OrderBy, Query, Repository, SingleExecutorResolver,
    TrackingDispatcher, UnitOfWork, UnitOfWorkConfig, Value, WarehouseRegistry,
};

#[derive(Parser)]
#[command(name = "txstage")]
#[command(about = "Runs a staged unit-of-work scenario against the in-memory store")]
struct Cli {
    /// Rows seeded into the store before the scenario runs
    #[arg(long, default_value_t = 5)]
    seed: i64,

    /// Unit-of-work options, e.g. "label=demo;max_parallel_groups=4"
    #[arg(long, default_value = "label=demo")]
    options: String,

    /// Price increase applied to every product above the threshold
    #[arg(long, default_value_t = 5)]
    bump: i64,

    #[arg(long, default_value_t = 20)]
    threshold: i64,

    /// Make the store reject every command at commit time
    #[arg(long)]
    fail: bool,
}

#[derive(Debug, Clone)]
struct Product {
    sku: i64,
    title: String,
    price: i64,
}

impl Entity for Product {
    fn descriptor() -> EntityDescriptor<Self> {
        EntityDescriptor::builder("product")
            .field("sku", DataType::Integer, |p: &Product| Value::Integer(p.sku), |p, v| {
                p.sku = expect_i64(v, "sku")?;
                Ok(())
            })
            .field("title", DataType::Text, |p: &Product| Value::Text(p.title.clone()), |p, v| {
                p.title = expect_text(v, "title")?;
                Ok(())
            })
            .field("price", DataType::Integer, |p: &Product| Value::Integer(p.price), |p, v| {
                p.price = expect_i64(v, "price")?;
                Ok(())
            })
            .primary_key(["sku"])
            .build()
    }
}

#[derive(Serialize)]
struct Report {
    unit: String,
    label: String,
    staged_records: usize,
    staged_count: u64,
    staged_total: Value,
    top_three: Vec<i64>,
    result: Option<CommitResult>,
    error: Option<String>,
    stored_rows: usize,
    published_events: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config: UnitOfWorkConfig = cli.options.parse().context("invalid --options")?;
    let seeded = (1..=cli.seed).map(|sku| Product {
        sku,
        title: format!("product-{}", sku),
        price: sku * 10,
    });
    let store = Arc::new(MemoryStore::with_rows("main", seeded).context("failed to seed store")?);
    let dispatcher = Arc::new(TrackingDispatcher::new());
    let sink = Arc::new(MemoryEventSink::new());
    let unit = Arc::new(
        UnitOfWork::builder(Arc::new(SingleExecutorResolver::new(store.clone())))
            .config(config.clone())
            .dispatcher(dispatcher.clone())
            .event_sink(sink.clone())
            .build(),
    );
    let repository: Repository<Product> = Repository::new(store.clone());

    let staged = WarehouseRegistry::scope(unit.clone(), run_scenario(&repository, &cli)).await?;
    let staged_records = unit.pending_records()?;

    store.set_unavailable(cli.fail);
    let (result, error) = match unit.commit().await {
        Ok(result) => (Some(result), None),
        Err(err) => (None, Some(err.to_string())),
    };
    dispatcher.wait_idle().await;

    let report = Report {
        unit: unit.id().to_string(),
        label: config.label,
        staged_records,
        staged_count: staged.0,
        staged_total: staged.1,
        top_three: staged.2,
        result,
        error,
        stored_rows: store.rows().await.len(),
        published_events: sink.published()?.len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_scenario(repository: &Repository<Product>, cli: &Cli) -> Result<(u64, Value, Vec<i64>)> {
    let by_price = Query::all().order_by(OrderBy::desc("price"));
    let mut products = repository.get_list(&by_price).await?;

    if let Some(first) = products.first_mut() {
        first.title = format!("{} (featured)", first.title);
        repository.save(first.clone())?;
    }
    repository.save(Product {
        sku: cli.seed + 1,
        title: "fresh".into(),
        price: 15,
    })?;
    repository.remove_where(Criteria::lt("price", 15))?;
    repository.modify_where(
        Modification::new().increment("price", cli.bump),
        Criteria::gt("price", cli.threshold),
    )?;

    if let Some(unit) = WarehouseRegistry::current() {
        unit.raise_event(DomainEvent::new("catalog_updated", &serde_json::json!({ "bump": cli.bump }))?)?;
    }

    let count = repository.count(&Query::all()).await?;
    let total = repository.sum(&Query::all().target("price")).await?;
    let top = repository
        .get_list(&by_price.clone().limit(3))
        .await?
        .iter()
        .map(|p| p.sku)
        .collect();
    Ok((count, total, top))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("txstage=warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
