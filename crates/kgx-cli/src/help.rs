/// Parameter table appended to the generated usage line.
pub const PARAMETERS: &str = "\
Parameters (any number of leading dashes, case-insensitive):
  -size <n>M | <n>G | <n>% | <n> | auto   test size; a bare number below 100 is a percentage
  -threads <1-64> | auto                  worker threads (auto uses every logical CPU)
  -cache <0-3>                            CPU cache: 0 disabled, 1 write-combine, 2 default, 3 enabled
  -rng <0-1>                              RNG: 0 default, 1 xorwow
  -coverage <0-999999> | on | off         stop after this coverage percentage
  -errors <0-100> | on | off              stop after this many errors
  -delay <0-1000>                         coverage percentage before max speed is tracked
  --fpu[:off]                             stress the FPU
  --log[:off]                             write history
  --default                               reset settings to defaults first
  --log-restore                           reload history from the log file and exit
  --no-start                              apply settings without starting a test

A switch followed by a value takes the value instead (e.g. -fpu off).
Without --no-start, valid parameters start a test as soon as it fits in free memory.

Environment:
  KGX_SETTINGS_PATH, KGX_HISTORY_PATH, KGX_ENGINE (sim|native),
  KGX_SIM_THROUGHPUT_MBPS, KGX_SIM_ERRORS, KGX_STATUS_INTERVAL_MS,
  KGX_STATUS_FORMAT (text|json), KGX_START_TIMEOUT_MS, KGX_ASSUME_YES,
  KGX_LOG_LEVEL, KGX_LOG_STDOUT";

pub const USAGE_HINT: &str = "See 'kgx --help' for command line usage.";

/// `-h`, `--help`, `-?` in any dash count; case is ignored. Tokens without
/// a leading dash are values, never help requests.
pub fn is_help_flag(token: &str) -> bool {
    let Some(name) = token.trim().strip_prefix('-') else {
        return false;
    };
    matches!(
        name.trim_start_matches('-').to_lowercase().as_str(),
        "help" | "h" | "?"
    )
}

pub fn is_help_request<S: AsRef<str>>(tokens: &[S]) -> bool {
    tokens.iter().any(|token| is_help_flag(token.as_ref()))
}
