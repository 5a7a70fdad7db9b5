mod cli;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use tresor::api::{ApiClient, MATCHES_PATH, PRICE_HISTORY_PATH, TRANSACTIONS_PATH, parse_records};
use tresor::cache::{DATASET_MATCHES, DATASET_PRICES, DATASET_TRANSACTIONS, SnapshotCache};
use tresor::categories::bucket_costs_with_fallback;
use tresor::config::{AppConfig, AppPaths, app_paths, load_or_init_config, now_utc, write_config};
use tresor::domain::{CalendarDate, MonetaryEvent, PriceObservation, SkipReport};
use tresor::error::{ExportError, ReconcileError};
use tresor::export;
use tresor::filters::{EventFilter, PriceFilter, parse_filter_date};
use tresor::prices::{PriceAnalysis, PriceVariation, analyze_prices};
use tresor::reconciliation::{
    MatchAction, MatchCandidate, MatchStatus, ReconciliationDesk, count_by_status, order_matches,
};
use tresor::timeline::{Timeline, aggregate};

use crate::cli::{
    CacheCmd, Cli, Command, ConfigCmd, EventFilterArgs, ExportCmd, MatchesCmd, OutputFormat,
    PriceFilterArgs, SourceArgs,
};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TRESOR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

struct Ctx {
    paths: AppPaths,
    cfg: AppConfig,
    cfg_path: PathBuf,
    api_url: Option<String>,
    api_token: Option<String>,
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = app_paths(cli.home.clone())?;
    let (cfg, cfg_path) = load_or_init_config(&paths)?;
    let mut ctx = Ctx {
        paths,
        cfg,
        cfg_path,
        api_url: cli.api_url,
        api_token: cli.api_token,
    };

    match cli.command {
        Command::Timeline(args) => {
            let granularity = args.granularity.unwrap_or(ctx.cfg.default_granularity);
            let filter = event_filter(&args.filter)?;
            let events = ctx.load_events(&args.source, &filter)?;
            let timeline = aggregate(&events, granularity);
            print_timeline(&timeline, args.format)?;
        }
        Command::Costs(args) => {
            let granularity = args.granularity.unwrap_or(ctx.cfg.default_granularity);
            let filter = event_filter(&args.filter)?;
            let events = ctx.load_events(&args.source, &filter)?;
            let costs = bucket_costs_with_fallback(&events, granularity, &ctx.cfg.fallback_category);
            match args.format {
                OutputFormat::Csv => export::write_category_costs(io::stdout().lock(), &costs)?,
                format => {
                    let mut rows = Vec::new();
                    for b in &costs.buckets {
                        for (category, cost) in &b.costs {
                            rows.push(vec![b.key.clone(), category.clone(), format!("{cost:.2}")]);
                        }
                    }
                    if rows.is_empty() {
                        println!("(no outflows)");
                    } else if format == OutputFormat::Table {
                        print_table(&["BUCKET", "CATEGORY", "COST"], &rows);
                        println!();
                        println!("(by category)");
                        for (category, total) in costs.categories() {
                            println!("{category}\t{total:.2}");
                        }
                    } else {
                        println!("key\tcategory\tcost");
                        for row in rows {
                            println!("{}", row.join("\t"));
                        }
                    }
                }
            }
        }
        Command::Prices(args) => {
            let filter = price_filter(&args.filter)?;
            let observations = ctx.load_prices(&args.source, &filter)?;
            let analysis = analyze_prices(&observations);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print_price_analysis(&analysis);
            }
        }
        Command::Export(args) => match args.cmd {
            ExportCmd::Transactions {
                source,
                filter,
                output,
            } => {
                let filter = event_filter(&filter)?;
                let events = ctx.load_events(&source, &filter)?;
                write_output(output.as_deref(), |w| export::write_transactions(w, &events))?;
            }
            ExportCmd::Prices {
                source,
                filter,
                output,
            } => {
                let filter = price_filter(&filter)?;
                let observations = ctx.load_prices(&source, &filter)?;
                write_output(output.as_deref(), |w| export::write_prices(w, &observations))?;
            }
            ExportCmd::Timeline {
                granularity,
                source,
                filter,
                output,
            } => {
                let granularity = granularity.unwrap_or(ctx.cfg.default_granularity);
                let filter = event_filter(&filter)?;
                let events = ctx.load_events(&source, &filter)?;
                let timeline = aggregate(&events, granularity);
                write_output(output.as_deref(), |w| export::write_timeline(w, &timeline))?;
            }
        },
        Command::Matches(args) => handle_matches(&ctx, args.cmd)?,
        Command::Cache(args) => {
            let (cache, cache_path) = SnapshotCache::open(&ctx.paths)?;
            match args.cmd {
                CacheCmd::List => {
                    let rows = cache.list()?;
                    if rows.is_empty() {
                        println!("(no snapshots)");
                    } else {
                        let rows: Vec<Vec<String>> = rows
                            .into_iter()
                            .map(|(dataset, key, at)| vec![dataset, key, at.to_rfc3339()])
                            .collect();
                        print_table(&["DATASET", "FILTER", "FETCHED AT"], &rows);
                    }
                }
                CacheCmd::Clear => {
                    let n = cache.clear()?;
                    println!("Removed {n} snapshot(s) from {}", cache_path.display());
                }
            }
        }
        Command::Config(args) => handle_config(&mut ctx, args.cmd)?,
    }

    Ok(())
}

impl Ctx {
    fn client(&self) -> Result<ApiClient> {
        let (url, token) = self
            .cfg
            .api_endpoint(self.api_url.as_deref(), self.api_token.as_deref())?;
        ApiClient::new(url, token)
    }

    /// Fetches a dataset through the snapshot cache. Only payloads that parse are cached.
    fn fetch_records<T: DeserializeOwned>(
        &self,
        dataset: &str,
        filter_key: &str,
        path: &str,
        query: &[(&str, String)],
        refresh: bool,
    ) -> Result<Vec<T>> {
        let client = self.client()?;
        let (cache, _) = SnapshotCache::open(&self.paths)?;
        let now = now_utc();
        // Capped at ten years.
        let ttl_secs = self.cfg.cache_ttl_secs.min(315_360_000);
        let ttl = chrono::Duration::seconds(ttl_secs as i64);

        if !refresh {
            if let Some(snapshot) = cache.get(dataset, filter_key, ttl, now)? {
                tracing::debug!(dataset, filter_key, fetched_at = %snapshot.fetched_at, "serving cached snapshot");
                return parse_records(&snapshot.payload_json)
                    .with_context(|| format!("Invalid cached {dataset} snapshot"));
            }
        }

        let raw = client.get_raw(path, query)?;
        let records = parse_records(&raw)
            .with_context(|| format!("Invalid {dataset} payload from {}", client.base_url()))?;
        cache.put(dataset, filter_key, &raw, now)?;
        Ok(records)
    }

    fn load_events(&self, source: &SourceArgs, filter: &EventFilter) -> Result<Vec<MonetaryEvent>> {
        let events: Vec<MonetaryEvent> = match &source.input {
            Some(path) => read_input(path)?,
            None => self.fetch_records(
                DATASET_TRANSACTIONS,
                &filter.cache_key(),
                TRANSACTIONS_PATH,
                &filter.query_params(),
                source.refresh,
            )?,
        };
        Ok(filter.apply(&events))
    }

    fn load_prices(&self, source: &SourceArgs, filter: &PriceFilter) -> Result<Vec<PriceObservation>> {
        let observations: Vec<PriceObservation> = match &source.input {
            Some(path) => read_input(path)?,
            None => self.fetch_records(
                DATASET_PRICES,
                &filter.cache_key(),
                PRICE_HISTORY_PATH,
                &filter.query_params(),
                source.refresh,
            )?,
        };
        Ok(filter.apply(&observations))
    }
}

fn read_input<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_records(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn optional_date(raw: Option<&str>, flag: &str) -> Result<Option<CalendarDate>> {
    raw.map(|s| parse_filter_date(s).with_context(|| format!("Invalid --{flag}")))
        .transpose()
}

fn event_filter(args: &EventFilterArgs) -> Result<EventFilter> {
    let filter = EventFilter {
        from: optional_date(args.from.as_deref(), "from")?,
        to: optional_date(args.to.as_deref(), "to")?,
        category: args.category.clone(),
        direction: args.direction,
    };
    check_range(&filter.from, &filter.to)?;
    Ok(filter)
}

fn price_filter(args: &PriceFilterArgs) -> Result<PriceFilter> {
    let filter = PriceFilter {
        from: optional_date(args.from.as_deref(), "from")?,
        to: optional_date(args.to.as_deref(), "to")?,
        supplier: args.supplier.clone(),
        product: args.product.clone(),
    };
    check_range(&filter.from, &filter.to)?;
    Ok(filter)
}

fn check_range(
    from: &Option<CalendarDate>,
    to: &Option<CalendarDate>,
) -> Result<()> {
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(anyhow!("Invalid range: --from {f} is after --to {t}"));
        }
    }
    Ok(())
}

fn write_output<F>(path: Option<&Path>, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> std::result::Result<(), ExportError>,
{
    match path {
        Some(p) => {
            let mut file =
                fs::File::create(p).with_context(|| format!("Failed to create {}", p.display()))?;
            write(&mut file).with_context(|| format!("Failed to write {}", p.display()))?;
            eprintln!("Wrote {}", p.display());
        }
        None => {
            let mut out = io::stdout().lock();
            write(&mut out).context("Failed to write CSV to stdout")?;
        }
    }
    Ok(())
}

fn print_timeline(timeline: &Timeline, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => export::write_timeline(io::stdout().lock(), timeline)?,
        OutputFormat::Tsv => {
            println!("key\tperiod_start\tperiod_end\tinflow\toutflow\tnet");
            for b in &timeline.buckets {
                println!(
                    "{}\t{}\t{}\t{:.2}\t{:.2}\t{:.2}",
                    b.key,
                    b.period_start,
                    b.period_end.map(|d| d.to_string()).unwrap_or_default(),
                    b.inflow,
                    b.outflow,
                    b.net
                );
            }
        }
        OutputFormat::Table => {
            if timeline.buckets.is_empty() {
                println!("(no buckets)");
            } else {
                let mut rows: Vec<Vec<String>> = timeline
                    .buckets
                    .iter()
                    .map(|b| {
                        vec![
                            b.key.clone(),
                            b.period_start.to_string(),
                            b.period_end.map(|d| d.to_string()).unwrap_or_default(),
                            format!("{:.2}", b.inflow),
                            format!("{:.2}", b.outflow),
                            format!("{:.2}", b.net),
                        ]
                    })
                    .collect();
                rows.push(vec![
                    "TOTAL".to_string(),
                    String::new(),
                    String::new(),
                    amount_or_dash(timeline.total_inflow()),
                    amount_or_dash(timeline.total_outflow()),
                    amount_or_dash(timeline.total_net()),
                ]);
                print_table(&["BUCKET", "START", "END", "INFLOW", "OUTFLOW", "NET"], &rows);
            }
            if !timeline.skipped.is_empty() {
                println!("(skipped: {})", skip_summary(&timeline.skipped, "amount"));
            }
        }
    }
    Ok(())
}

fn amount_or_dash(v: Option<Decimal>) -> String {
    v.map(|a| format!("{a:.2}")).unwrap_or_else(|| "-".to_string())
}

fn skip_summary(skipped: &SkipReport, amount_name: &str) -> String {
    let mut parts = vec![
        format!("{} unreadable date", skipped.unparseable_date),
        format!("{} missing {amount_name}", skipped.missing_amount),
    ];
    if skipped.overflowed > 0 {
        parts.push(format!("{} overflowing {amount_name}", skipped.overflowed));
    }
    parts.join(", ")
}

fn pct(v: Option<Decimal>) -> String {
    v.map(|p| format!("{p:.1}%")).unwrap_or_else(|| "-".to_string())
}

fn variation_rows(vs: &[PriceVariation]) -> Vec<Vec<String>> {
    vs.iter()
        .map(|v| {
            vec![
                v.product_key.clone(),
                v.name.clone().unwrap_or_default(),
                v.supplier.clone().unwrap_or_default(),
                format!("{:.2}", v.previous_price),
                format!("{:.2}", v.latest_price),
                format!("{:+.2}", v.delta),
                pct(v.pct),
            ]
        })
        .collect()
}

fn print_price_analysis(analysis: &PriceAnalysis) {
    let Some(summary) = &analysis.summary else {
        println!("(no price observations)");
        return;
    };

    println!("observations\t{}", summary.count);
    println!("min\t{:.2}", summary.min);
    println!("max\t{:.2}", summary.max);
    println!("average\t{:.2}", summary.average);
    println!("first\t{:.2}", summary.first);
    println!("last\t{:.2}", summary.last);
    println!("delta\t{:+.2}\t{}", summary.delta, pct(summary.delta_pct));

    println!();
    println!("(daily)");
    let rows: Vec<Vec<String>> = analysis
        .timeline
        .iter()
        .map(|p| {
            vec![
                p.date.to_string(),
                p.observations.to_string(),
                format!("{:.2}", p.average),
                format!("{:.2}", p.moving_average),
            ]
        })
        .collect();
    print_table(&["DATE", "N", "AVERAGE", "MA5"], &rows);

    let headers = ["PRODUCT", "NAME", "SUPPLIER", "PREVIOUS", "LATEST", "DELTA", "PCT"];
    println!();
    println!("(top increases)");
    if analysis.top_increases.is_empty() {
        println!("(none)");
    } else {
        print_table(&headers, &variation_rows(&analysis.top_increases));
    }
    println!();
    println!("(top drops)");
    if analysis.top_drops.is_empty() {
        println!("(none)");
    } else {
        print_table(&headers, &variation_rows(&analysis.top_drops));
    }

    println!();
    println!(
        "alerts\tmargin={}\tstockout={}\tflagged={}",
        analysis.alerts.margin,
        analysis.alerts.stockout,
        analysis.alerts.flagged.len()
    );
    if !analysis.skipped.is_empty() {
        println!("(skipped: {})", skip_summary(&analysis.skipped, "price"));
    }
}

fn handle_matches(ctx: &Ctx, cmd: MatchesCmd) -> Result<()> {
    let (id, action) = match cmd {
        MatchesCmd::List { source, status } => {
            let candidates: Vec<MatchCandidate> = match &source.input {
                Some(path) => read_input(path)?,
                None => ctx.fetch_records(DATASET_MATCHES, "all", MATCHES_PATH, &[], source.refresh)?,
            };
            let mut candidates = order_matches(candidates);
            if let Some(st) = status {
                candidates.retain(|c| c.status == st);
            }
            print_matches(&candidates);
            return Ok(());
        }
        MatchesCmd::Confirm { id } => (id, MatchAction::Confirm),
        MatchesCmd::Reject { id } => (id, MatchAction::Reject),
        MatchesCmd::Ignore { id } => (id, MatchAction::Ignore),
    };

    let client = ctx.client()?;
    let (cache, _) = SnapshotCache::open(&ctx.paths)?;
    let mut desk = ReconciliationDesk::open(client)?;
    let outcome = desk.act(&id, action);

    // Whatever happened server-side, the cached list is stale now.
    cache.invalidate(DATASET_MATCHES)?;

    match outcome {
        Ok(Some(status)) => println!("Match {id} is now {status}."),
        Ok(None) => println!("Match {id} accepted {action}; it is no longer listed."),
        Err(ReconcileError::NotAllowed { id, source }) => {
            let allowed: Vec<&str> = source
                .from
                .allowed_actions()
                .iter()
                .map(|a| a.as_str())
                .collect();
            let allowed = if allowed.is_empty() {
                "none".to_string()
            } else {
                allowed.join(", ")
            };
            return Err(anyhow!(
                "Match {id} is {}; cannot {}. Allowed actions: {allowed}",
                source.from,
                source.action
            ));
        }
        Err(ReconcileError::Refused { id, action, source }) => {
            let current = desk
                .get(&id)
                .map(|c| c.status.to_string())
                .unwrap_or_else(|| "unlisted".to_string());
            return Err(anyhow!(
                "Server refused to {action} match {id} (status stays {current}): {source:#}"
            ));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_matches(candidates: &[MatchCandidate]) {
    if candidates.is_empty() {
        println!("(no matches)");
        return;
    }

    let rows: Vec<Vec<String>> = candidates
        .iter()
        .map(|c| {
            let actions: Vec<&str> = c.status.allowed_actions().iter().map(|a| a.as_str()).collect();
            vec![
                c.id.clone(),
                format!("{:.2}", c.confidence),
                c.band().as_str().to_string(),
                c.status.to_string(),
                actions.join("/"),
                c.bank_line_label(),
                c.invoice_label(),
                c.reason.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["ID", "CONFIDENCE", "BAND", "STATUS", "ACTIONS", "BANK LINE", "INVOICE", "REASON"],
        &rows,
    );

    let counts = count_by_status(candidates);
    let summary: Vec<String> = MatchStatus::ALL
        .iter()
        .filter_map(|s| counts.get(s).map(|n| format!("{s}={n}")))
        .collect();
    println!("{}", summary.join("\t"));
}

fn handle_config(ctx: &mut Ctx, cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Show => {
            let cfg = &ctx.cfg;
            println!("config\t{}", ctx.cfg_path.display());
            println!("api_base_url\t{}", cfg.api_base_url.as_deref().unwrap_or("(none)"));
            println!(
                "api_token\t{}",
                if cfg.api_token.is_some() { "(set)" } else { "(none)" }
            );
            println!("default_granularity\t{}", cfg.default_granularity);
            println!("fallback_category\t{}", cfg.fallback_category);
            println!("cache_ttl_secs\t{}", cfg.cache_ttl_secs);
            return Ok(());
        }
        ConfigCmd::SetApi { url, token } => {
            let url = url.trim().trim_end_matches('/').to_string();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("API URL must start with http:// or https://, got: {url}"));
            }
            ctx.cfg.api_base_url = Some(url.clone());
            if token.is_some() {
                ctx.cfg.api_token = token;
            }
            println!("API set to {url}");
        }
        ConfigCmd::SetGranularity { granularity } => {
            ctx.cfg.default_granularity = granularity;
            println!("Default granularity set to {granularity}");
        }
        ConfigCmd::SetFallbackCategory { label } => {
            let label = label.trim().to_string();
            if label.is_empty() {
                return Err(anyhow!("Fallback category must not be empty"));
            }
            println!("Fallback category set to '{label}'");
            ctx.cfg.fallback_category = label;
        }
        ConfigCmd::SetCacheTtl { seconds } => {
            ctx.cfg.cache_ttl_secs = seconds;
            println!("Cache TTL set to {seconds}s");
        }
    }
    write_config(&ctx.cfg_path, &ctx.cfg)
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if headers.is_empty() {
        println!("(no columns)");
        return;
    }

    let cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();

    for row in rows {
        for (i, cell) in row.iter().take(cols).enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    fn print_row(cells: &[String], widths: &[usize]) {
        print!("|");
        for (i, w) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            print!(" {:width$} |", cell, width = *w);
        }
        println!();
    }

    fn print_sep(widths: &[usize]) {
        print!("|");
        for w in widths {
            print!("{}|", "-".repeat(w + 2));
        }
        println!();
    }

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    print_row(&header_cells, &widths);
    print_sep(&widths);
    for row in rows {
        print_row(row, &widths);
    }
}
