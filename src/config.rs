//! Configuration for the arbitrage engine
//!
//! Global knobs (thresholds, retry policy, submission behavior) plus one
//! [`ChainConfig`] per scanned chain. Loaded from the environment (`.env`
//! supported) or from a TOML file, validated before the scanners start.

use alloy_primitives::{address, Address};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::cartographer::ProtocolFamily;
use crate::fixed::{Bps, Usd};
use crate::retry::RetryPolicy;

// ============================================
// EXECUTION MODE
// ============================================

/// Execution mode determines how far a viable opportunity travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Detect, score and plan; never talks to the relay
    #[default]
    Simulation,

    /// Build, sign and relay-simulate the bundle, but never send it
    DryRun,

    /// Submit bundles to the private relay
    /// CAUTION: This spends real gas!
    Production,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Simulation => write!(f, "SIMULATION"),
            ExecutionMode::DryRun => write!(f, "DRY_RUN"),
            ExecutionMode::Production => write!(f, "PRODUCTION"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" | "sim" => Ok(ExecutionMode::Simulation),
            "dry_run" | "dryrun" | "dry-run" => Ok(ExecutionMode::DryRun),
            "production" | "prod" => Ok(ExecutionMode::Production),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

// ============================================
// FLASH LOAN PROVIDER KIND
// ============================================

/// Flash-loan contract families; decides how the loan call is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanProviderKind {
    /// Aave V3 pool, `flashLoanSimple`
    AaveV3,

    /// Balancer V2 vault, `flashLoan` with token arrays
    BalancerV2,
}

impl std::fmt::Display for LoanProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanProviderKind::AaveV3 => write!(f, "Aave V3"),
            LoanProviderKind::BalancerV2 => write!(f, "Balancer V2"),
        }
    }
}

// ============================================
// POLICIES
// ============================================

/// What happens to an opportunity whose (chain, asset) slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
    /// Wait for the in-flight plan to finish
    Queue,
    /// Reject immediately
    #[default]
    Drop,
}

/// Ordering between venue assignments of the same token cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    MarginThenLiquidity,
    LiquidityThenMargin,
}

/// Weights of the risk components, in bps; they should sum to 10 000
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskWeights {
    pub depth_bps: u32,
    pub staleness_bps: u32,
    pub reliability_bps: u32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            depth_bps: 5_000,
            staleness_bps: 2_000,
            reliability_bps: 3_000,
        }
    }
}

// ============================================
// CHAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    /// Reference USD price, refreshed from quotes while scanning
    pub usd_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub address: Address,
    /// Pool coins in on-chain index order
    pub tokens: Vec<Address>,
    /// Overrides the venue fee for this pool
    #[serde(default)]
    pub fee_bps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub id: String,
    pub family: ProtocolFamily,
    pub router: Address,
    #[serde(default)]
    pub factory: Option<Address>,
    pub fee_bps: u32,
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCapacity {
    pub asset: Address,
    /// Whole tokens the provider can lend
    pub max_tokens: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanProviderConfig {
    pub id: String,
    pub kind: LoanProviderKind,
    pub address: Address,
    pub fee_bps: u32,
    pub capacity: Vec<AssetCapacity>,
}

/// Gas units charged per execution: `base + per_hop × hops`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasModel {
    pub base_gas: u64,
    pub gas_per_hop: u64,
}

impl Default for GasModel {
    fn default() -> Self {
        Self {
            base_gas: 120_000,
            gas_per_hop: 110_000,
        }
    }
}

impl GasModel {
    pub fn units_for(&self, hops: usize) -> u64 {
        self.base_gas + self.gas_per_hop * hops as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,

    /// Ordered RPC endpoints; the first healthy one wins
    pub rpc_urls: Vec<String>,

    /// Private builder relay
    pub relay_url: String,

    /// Deployed flash-loan executor contract
    #[serde(default)]
    pub executor_address: Option<Address>,

    /// Receives swept profit
    #[serde(default)]
    pub operator_address: Option<Address>,

    /// Wrapped native token; prices gas in USD
    pub wrapped_native: Address,

    /// Stable token priced at $1 used to refresh USD references
    #[serde(default)]
    pub usd_anchor: Option<Address>,

    /// Tokens cycles may start from (and be borrowed in)
    pub base_tokens: Vec<Address>,

    pub tokens: Vec<TokenConfig>,
    pub venues: Vec<VenueConfig>,
    pub loan_providers: Vec<LoanProviderConfig>,

    #[serde(default)]
    pub gas: GasModel,

    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,
}

fn default_block_time_ms() -> u64 {
    12_000
}

const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
const USDT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
const DAI: Address = address!("6B175474E89094C44Da98b954EedcdeCB5BE3830");
const WBTC: Address = address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599");

impl ChainConfig {
    /// Ethereum mainnet with the high-liquidity pools of the major venues
    pub fn ethereum_mainnet(rpc_urls: Vec<String>, relay_url: String) -> Self {
        let pool = |addr: Address, t0: Address, t1: Address| PoolConfig {
            address: addr,
            tokens: vec![t0, t1],
            fee_bps: None,
        };
        let v3_pool = |addr: Address, t0: Address, t1: Address, fee_bps: u32| PoolConfig {
            address: addr,
            tokens: vec![t0, t1],
            fee_bps: Some(fee_bps),
        };

        Self {
            chain_id: 1,
            name: "ethereum".to_string(),
            rpc_urls,
            relay_url,
            executor_address: None,
            operator_address: None,
            wrapped_native: WETH,
            usd_anchor: Some(USDC),
            base_tokens: vec![WETH, USDC, USDT, DAI, WBTC],
            tokens: vec![
                TokenConfig { symbol: "WETH".into(), address: WETH, decimals: 18, usd_price: 3_500.0 },
                TokenConfig { symbol: "USDC".into(), address: USDC, decimals: 6, usd_price: 1.0 },
                TokenConfig { symbol: "USDT".into(), address: USDT, decimals: 6, usd_price: 1.0 },
                TokenConfig { symbol: "DAI".into(), address: DAI, decimals: 18, usd_price: 1.0 },
                TokenConfig { symbol: "WBTC".into(), address: WBTC, decimals: 8, usd_price: 95_000.0 },
            ],
            venues: vec![
                VenueConfig {
                    id: "uniswap-v2".into(),
                    family: ProtocolFamily::ConstantProduct,
                    router: address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
                    factory: Some(address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f")),
                    fee_bps: 30,
                    pools: vec![
                        pool(address!("B4e16d0168e52d35CaCD2c6185b44281Ec28C9Dc"), USDC, WETH),
                        pool(address!("0d4a11d5EEaaC28EC3F61d100daF4d40471f1852"), WETH, USDT),
                        pool(address!("A478c2975Ab1Ea89e8196811F51A7B7Ade33eB11"), DAI, WETH),
                        pool(address!("Bb2b8038a1640196FbE3e38816F3e67Cba72D940"), WBTC, WETH),
                    ],
                },
                VenueConfig {
                    id: "sushiswap-v2".into(),
                    family: ProtocolFamily::ConstantProduct,
                    router: address!("d9e1cE17f2641f24aE83637ab66a2cca9C378B9F"),
                    factory: Some(address!("C0AEe478e3658e2610c5F7A4A2E1777cE9e4f2Ac")),
                    fee_bps: 30,
                    pools: vec![
                        pool(address!("397FF1542f962076d0BFE58eA045FfA2d347ACa0"), USDC, WETH),
                        pool(address!("06da0fd433C1A5d7a4faa01111c044910A184553"), WETH, USDT),
                        pool(address!("C3D03e4F041Fd4cD388c549Ee2A29a9E5075882f"), DAI, WETH),
                        pool(address!("CEfF51756c56CeFFCA006cD410B03FFC46dd3a58"), WBTC, WETH),
                    ],
                },
                VenueConfig {
                    id: "uniswap-v3".into(),
                    family: ProtocolFamily::ConcentratedLiquidity,
                    router: address!("E592427A0AEce92De3Edee1F18E0157C05861564"),
                    factory: Some(address!("1F98431c8aD98523631AE4a59f267346ea31F984")),
                    fee_bps: 30,
                    pools: vec![
                        v3_pool(address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640"), USDC, WETH, 5),
                        v3_pool(address!("11b815efB8f581194ae79006d24E0d814B7697F6"), WETH, USDT, 5),
                        v3_pool(address!("60594a405d53811d3BC4766596EFD80fd545A270"), DAI, WETH, 5),
                        v3_pool(address!("4585FE77225b41b697C938B018E2Ac67Ac5a20c0"), WBTC, WETH, 5),
                        v3_pool(address!("3416cF6C708Da44DB2624D63ea0AAef7113527C6"), USDC, USDT, 1),
                        v3_pool(address!("5777d92f208679DB4b9778590Fa3CAB3aC9e2168"), DAI, USDC, 1),
                    ],
                },
                VenueConfig {
                    id: "curve-3pool".into(),
                    family: ProtocolFamily::StableSwap,
                    router: address!("bEbc44782C7dB0a1A60Cb6fe97d0b483032FF1C7"),
                    factory: None,
                    fee_bps: 1,
                    pools: vec![PoolConfig {
                        address: address!("bEbc44782C7dB0a1A60Cb6fe97d0b483032FF1C7"),
                        tokens: vec![DAI, USDC, USDT],
                        fee_bps: None,
                    }],
                },
            ],
            loan_providers: vec![
                LoanProviderConfig {
                    id: "balancer-v2".into(),
                    kind: LoanProviderKind::BalancerV2,
                    address: address!("BA12222222228d8Ba445958a75a0704d566BF2C8"),
                    fee_bps: 0,
                    capacity: vec![
                        AssetCapacity { asset: WETH, max_tokens: 20_000.0 },
                        AssetCapacity { asset: USDC, max_tokens: 10_000_000.0 },
                        AssetCapacity { asset: WBTC, max_tokens: 300.0 },
                    ],
                },
                LoanProviderConfig {
                    id: "aave-v3".into(),
                    kind: LoanProviderKind::AaveV3,
                    address: address!("87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"),
                    fee_bps: 5,
                    capacity: vec![
                        AssetCapacity { asset: WETH, max_tokens: 200_000.0 },
                        AssetCapacity { asset: USDC, max_tokens: 100_000_000.0 },
                        AssetCapacity { asset: USDT, max_tokens: 50_000_000.0 },
                        AssetCapacity { asset: DAI, max_tokens: 50_000_000.0 },
                        AssetCapacity { asset: WBTC, max_tokens: 5_000.0 },
                    ],
                },
            ],
            gas: GasModel::default(),
            block_time_ms: default_block_time_ms(),
        }
    }
}

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ========== Execution Settings ==========
    pub execution_mode: ExecutionMode,

    /// Kill switch - never execute anything
    pub emergency_stop: bool,

    // ========== Profit & Risk Thresholds ==========
    /// Minimum net profit in USD for a Viable opportunity
    pub min_profit_usd: f64,

    /// Highest acceptable composite risk score (0..=10 000)
    pub max_risk_bps: u32,

    /// Cycles must beat break-even by at least this much before scoring
    pub min_cycle_margin_bps: u32,

    pub risk_weights: RiskWeights,

    // ========== Sizing & Guards ==========
    /// Largest trade the evaluator sizes toward
    pub max_trade_usd: f64,

    /// Slippage allowed on each swap's minimum-output guard
    pub slippage_tolerance_bps: u32,

    /// Extra input borrowed on top of the trade to absorb execution drift
    pub safety_margin_bps: u32,

    // ========== Path Finding ==========
    /// Maximum hops in an arbitrage cycle (2 or 3)
    pub max_hops: usize,

    pub tie_break: TieBreak,

    // ========== Quote Feed ==========
    /// Quotes older than this are never executed
    pub max_quote_age_ms: u64,

    /// Pools shallower than this are not quoted
    pub min_liquidity_usd: f64,

    /// Venues fetched in parallel
    pub fetch_concurrency: usize,

    /// Budget for one venue's quotes
    pub venue_timeout_ms: u64,

    /// Shared by every network-facing call
    pub retry: RetryPolicy,

    // ========== Submission ==========
    /// Priority fee as a multiple of base fee (10 000 = 1x)
    pub priority_fee_multiplier_bps: u32,

    /// Priority fee bump per resubmission (10 000 = no bump)
    pub priority_fee_escalation_bps: u32,

    /// Total submissions before giving up as Expired
    pub max_submission_attempts: u32,

    /// Blocks to wait for inclusion per submission
    pub inclusion_blocks: u64,

    /// Receipt polling cadence while waiting for inclusion
    pub inclusion_poll_ms: u64,

    pub slot_policy: SlotPolicy,

    // ========== Scanning ==========
    pub scan_interval_ms: u64,

    /// Probe interval while a chain is suspended
    pub health_check_interval_ms: u64,

    /// JSONL mirror of the feedback ledger
    pub ledger_journal_path: Option<String>,

    pub chains: Vec<ChainConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Simulation,
            emergency_stop: false,
            min_profit_usd: 5.0,
            max_risk_bps: 6_000,
            min_cycle_margin_bps: 1,
            risk_weights: RiskWeights::default(),
            max_trade_usd: 10_000.0,
            slippage_tolerance_bps: 50,
            safety_margin_bps: 20,
            max_hops: 3,
            tie_break: TieBreak::MarginThenLiquidity,
            max_quote_age_ms: 6_000,
            min_liquidity_usd: 50_000.0,
            fetch_concurrency: 8,
            venue_timeout_ms: 4_000,
            retry: RetryPolicy::default(),
            priority_fee_multiplier_bps: 20_000,
            priority_fee_escalation_bps: 12_500,
            max_submission_attempts: 3,
            inclusion_blocks: 2,
            inclusion_poll_ms: 1_000,
            slot_policy: SlotPolicy::Drop,
            scan_interval_ms: 12_000,
            health_check_interval_ms: 15_000,
            ledger_journal_path: Some("./logs/submission_ledger.jsonl".to_string()),
            chains: vec![ChainConfig::ethereum_mainnet(
                vec!["https://eth.llamarpc.com".to_string()],
                "https://relay.flashbots.net".to_string(),
            )],
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables and .env file.
    /// Builds a single Ethereum mainnet chain from `RPC_URL`/`BACKUP_RPC_URLS`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let mut rpc_urls = vec![env::var("RPC_URL").unwrap_or_else(|_| "https://eth.llamarpc.com".to_string())];
        if let Ok(backups) = env::var("BACKUP_RPC_URLS") {
            rpc_urls.extend(backups.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from));
        }
        let relay_url = env::var("RELAY_URL").unwrap_or_else(|_| "https://relay.flashbots.net".to_string());

        let mut chain = ChainConfig::ethereum_mainnet(rpc_urls, relay_url);
        chain.chain_id = env_or("CHAIN_ID", 1);
        chain.executor_address = env::var("EXECUTOR_CONTRACT_ADDRESS").ok().and_then(|s| s.parse().ok());
        chain.operator_address = env::var("OPERATOR_ADDRESS").ok().and_then(|s| s.parse().ok());

        let mut retry = defaults.retry.clone();
        retry.max_attempts = env_or("RPC_MAX_ATTEMPTS", retry.max_attempts);
        retry.attempt_timeout_ms = env_or("RPC_TIMEOUT_MS", retry.attempt_timeout_ms);

        Ok(Self {
            execution_mode: env_or("EXECUTION_MODE", defaults.execution_mode),
            emergency_stop: env_or("EMERGENCY_STOP", false),
            min_profit_usd: env_or("MIN_PROFIT_USD", defaults.min_profit_usd),
            max_risk_bps: env_or("MAX_RISK_BPS", defaults.max_risk_bps),
            min_cycle_margin_bps: env_or("MIN_CYCLE_MARGIN_BPS", defaults.min_cycle_margin_bps),
            risk_weights: defaults.risk_weights,
            max_trade_usd: env_or("MAX_TRADE_USD", defaults.max_trade_usd),
            slippage_tolerance_bps: env_or("SLIPPAGE_TOLERANCE_BPS", defaults.slippage_tolerance_bps),
            safety_margin_bps: env_or("SAFETY_MARGIN_BPS", defaults.safety_margin_bps),
            max_hops: env_or("MAX_HOPS", defaults.max_hops),
            tie_break: defaults.tie_break,
            max_quote_age_ms: env_or("MAX_QUOTE_AGE_MS", defaults.max_quote_age_ms),
            min_liquidity_usd: env_or("MIN_LIQUIDITY_USD", defaults.min_liquidity_usd),
            fetch_concurrency: env_or("FETCH_CONCURRENCY", defaults.fetch_concurrency),
            venue_timeout_ms: env_or("VENUE_TIMEOUT_MS", defaults.venue_timeout_ms),
            retry,
            priority_fee_multiplier_bps: env_or("PRIORITY_FEE_MULTIPLIER_BPS", defaults.priority_fee_multiplier_bps),
            priority_fee_escalation_bps: env_or("PRIORITY_FEE_ESCALATION_BPS", defaults.priority_fee_escalation_bps),
            max_submission_attempts: env_or("MAX_SUBMISSION_ATTEMPTS", defaults.max_submission_attempts),
            inclusion_blocks: env_or("INCLUSION_BLOCKS", defaults.inclusion_blocks),
            inclusion_poll_ms: env_or("INCLUSION_POLL_MS", defaults.inclusion_poll_ms),
            slot_policy: match env::var("SLOT_POLICY").unwrap_or_default().to_lowercase().as_str() {
                "queue" => SlotPolicy::Queue,
                _ => SlotPolicy::Drop,
            },
            scan_interval_ms: env_or("SCAN_INTERVAL_MS", defaults.scan_interval_ms),
            health_check_interval_ms: env_or("HEALTH_CHECK_INTERVAL_MS", defaults.health_check_interval_ms),
            ledger_journal_path: env::var("LEDGER_JOURNAL_PATH").ok().or(defaults.ledger_journal_path),
            chains: vec![chain],
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn min_profit(&self) -> Usd {
        Usd::from_dollars(self.min_profit_usd)
    }

    pub fn max_trade(&self) -> Usd {
        Usd::from_dollars(self.max_trade_usd)
    }

    pub fn slippage_tolerance(&self) -> Bps {
        Bps(self.slippage_tolerance_bps)
    }

    pub fn safety_margin(&self) -> Bps {
        Bps(self.safety_margin_bps)
    }

    /// Validate configuration before any scanner starts
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(eyre::eyre!("No chains configured"));
        }

        if !(2..=3).contains(&self.max_hops) {
            return Err(eyre::eyre!("MAX_HOPS must be 2 or 3 (currently {})", self.max_hops));
        }

        let weights = self.risk_weights;
        let total = weights.depth_bps + weights.staleness_bps + weights.reliability_bps;
        if total != 10_000 {
            return Err(eyre::eyre!("Risk weights must sum to 10000 bps (currently {})", total));
        }

        if self.max_risk_bps > 10_000 {
            return Err(eyre::eyre!("MAX_RISK_BPS must be <= 10000"));
        }

        if self.slippage_tolerance_bps >= 10_000 || self.safety_margin_bps >= 10_000 {
            return Err(eyre::eyre!("Slippage tolerance and safety margin must be below 100%"));
        }

        if self.max_submission_attempts == 0 {
            return Err(eyre::eyre!("MAX_SUBMISSION_ATTEMPTS must be at least 1"));
        }

        if self.fetch_concurrency == 0 {
            return Err(eyre::eyre!("FETCH_CONCURRENCY must be at least 1"));
        }

        for chain in &self.chains {
            if chain.rpc_urls.is_empty() || chain.rpc_urls.iter().any(|u| u.contains("YOUR_API_KEY")) {
                return Err(eyre::eyre!("Chain {} has no valid RPC endpoint", chain.name));
            }

            for venue in &chain.venues {
                for pool in &venue.pools {
                    if pool.tokens.len() < 2 {
                        return Err(eyre::eyre!("Pool {:?} on {} lists fewer than 2 tokens", pool.address, venue.id));
                    }
                }
            }

            if self.execution_mode == ExecutionMode::Production {
                if chain.executor_address.is_none() {
                    return Err(eyre::eyre!(
                        "Production mode requires an executor contract on chain {}",
                        chain.name
                    ));
                }
                if chain.operator_address.is_none() {
                    return Err(eyre::eyre!(
                        "Production mode requires an operator address on chain {}",
                        chain.name
                    ));
                }
                if self.min_profit_usd < 2.0 {
                    return Err(eyre::eyre!(
                        "Production mode requires MIN_PROFIT_USD >= $2 (currently ${:.2})",
                        self.min_profit_usd
                    ));
                }
            }
        }

        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║               FLASHSNIPE - CONFIGURATION                   ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Execution Mode:    {:^40} ║", self.execution_mode.to_string());
        println!("║ Chains:            {:^40} ║", self.chains.len());
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ THRESHOLDS                                                 ║");
        println!("║ • Min Net Profit:  ${:<39.2} ║", self.min_profit_usd);
        println!("║ • Max Risk:        {:<36} bps ║", self.max_risk_bps);
        println!("║ • Slippage Guard:  {:<36} bps ║", self.slippage_tolerance_bps);
        println!("║ • Safety Margin:   {:<36} bps ║", self.safety_margin_bps);
        println!("║ • Max Quote Age:   {:<37} ms ║", self.max_quote_age_ms);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SUBMISSION                                                 ║");
        println!("║ • Max Attempts:    {:^40} ║", self.max_submission_attempts);
        println!("║ • Inclusion Window:{:^34} blocks ║", self.inclusion_blocks);
        println!("║ • Slot Policy:     {:^40} ║", format!("{:?}", self.slot_policy));
        println!("╠════════════════════════════════════════════════════════════╣");
        for chain in &self.chains {
            println!(
                "║ {:<12} id={:<6} venues={:<3} rpcs={:<3} providers={:<8}║",
                chain.name,
                chain.chain_id,
                chain.venues.len(),
                chain.rpc_urls.len(),
                chain.loan_providers.len()
            );
        }
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ • Emergency Stop:  {:^40} ║",
            if self.emergency_stop { "🛑 ACTIVE" } else { "✓ Inactive" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

// ============================================
// TESTS
// ============================================
