//! Command-line assembly for the inference server.
//!
//! Built-in flags are derived from [`ServerOptions`]. User-supplied extra
//! flags always win: a built-in whose key the user also passes is dropped,
//! together with its value, before the user flags are appended.

use std::collections::HashSet;
use std::path::Path;

use super::ServerOptions;

/// Flag spellings the server treats as the same option.
const ALIASES: &[(&str, &str)] = &[
    ("-m", "--model"),
    ("-t", "--threads"),
    ("-c", "--ctx-size"),
    ("-ngl", "--n-gpu-layers"),
    ("--gpu-layers", "--n-gpu-layers"),
    ("-md", "--model-draft"),
];

/// Build the full argument list for launching the server.
pub fn build_args(model_path: &Path, port: u16, options: &ServerOptions) -> Vec<String> {
    let overridden: HashSet<String> = options
        .extra_args
        .iter()
        .filter_map(|arg| flag_key(arg))
        .collect();

    let mut args = Vec::new();
    for (flag, value) in builtin_flags(model_path, port, options) {
        if overridden.contains(&canonical(flag)) {
            tracing::debug!(flag, "server: built-in flag overridden by user");
            continue;
        }
        args.push(flag.to_string());
        args.extend(value);
    }
    args.extend(options.extra_args.iter().cloned());
    args
}

fn builtin_flags(
    model_path: &Path,
    port: u16,
    options: &ServerOptions,
) -> Vec<(&'static str, Option<String>)> {
    let gpu_layers = if options.use_gpu { options.gpu_layers } else { 0 };

    let mut flags = vec![
        ("--model", Some(model_path.display().to_string())),
        ("--threads", Some(options.threads.to_string())),
        ("--ctx-size", Some(options.context_length.to_string())),
        ("--port", Some(port.to_string())),
        ("--n-gpu-layers", Some(gpu_layers.to_string())),
        ("--alias", Some(options.alias.clone())),
    ];

    if options.speculative_decoding
        && let Some(draft) = &options.draft_model_path
    {
        flags.push(("--model-draft", Some(draft.display().to_string())));
        flags.push(("--draft-max", Some(options.draft_max.to_string())));
        flags.push(("--draft-min", Some(options.draft_min.to_string())));
        flags.push(("--n-gpu-layers-draft", Some(gpu_layers.to_string())));
    }

    if let Some(mmproj) = &options.mmproj_path {
        flags.push(("--mmproj", Some(mmproj.display().to_string())));
    }

    flags
}

/// The canonical key of a flag token, or `None` for values.
fn flag_key(arg: &str) -> Option<String> {
    if !arg.starts_with('-') || arg.parse::<f64>().is_ok() {
        return None;
    }
    let key = arg.split_once('=').map_or(arg, |(key, _)| key);
    Some(canonical(key))
}

fn canonical(key: &str) -> String {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, long)| long)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options() -> ServerOptions {
        ServerOptions {
            alias: "local-model".to_string(),
            threads: 8,
            context_length: 4096,
            use_gpu: true,
            gpu_layers: 99,
            draft_model_path: None,
            speculative_decoding: false,
            draft_max: 16,
            draft_min: 4,
            mmproj_path: None,
            extra_args: Vec::new(),
        }
    }

    fn value_of<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    fn count(args: &[String], flag: &str) -> usize {
        args.iter().filter(|a| *a == flag).count()
    }

    #[test]
    fn test_builtin_flags() {
        let args = build_args(Path::new("/models/m.gguf"), 4579, &options());
        assert_eq!(value_of(&args, "--model"), Some("/models/m.gguf"));
        assert_eq!(value_of(&args, "--threads"), Some("8"));
        assert_eq!(value_of(&args, "--ctx-size"), Some("4096"));
        assert_eq!(value_of(&args, "--port"), Some("4579"));
        assert_eq!(value_of(&args, "--n-gpu-layers"), Some("99"));
        assert_eq!(value_of(&args, "--alias"), Some("local-model"));
        assert_eq!(count(&args, "--model-draft"), 0);
        assert_eq!(count(&args, "--mmproj"), 0);
    }

    #[test]
    fn test_gpu_disabled_offloads_nothing() {
        let mut opts = options();
        opts.use_gpu = false;
        let args = build_args(Path::new("m.gguf"), 1, &opts);
        assert_eq!(value_of(&args, "--n-gpu-layers"), Some("0"));
    }

    #[test]
    fn test_speculative_and_multimodal_flags() {
        let mut opts = options();
        opts.speculative_decoding = true;
        opts.draft_model_path = Some(PathBuf::from("draft.gguf"));
        opts.mmproj_path = Some(PathBuf::from("proj.gguf"));
        let args = build_args(Path::new("m.gguf"), 1, &opts);
        assert_eq!(value_of(&args, "--model-draft"), Some("draft.gguf"));
        assert_eq!(value_of(&args, "--draft-max"), Some("16"));
        assert_eq!(value_of(&args, "--draft-min"), Some("4"));
        assert_eq!(value_of(&args, "--n-gpu-layers-draft"), Some("99"));
        assert_eq!(value_of(&args, "--mmproj"), Some("proj.gguf"));
    }

    #[test]
    fn test_draft_ignored_without_speculative_decoding() {
        let mut opts = options();
        opts.draft_model_path = Some(PathBuf::from("draft.gguf"));
        let args = build_args(Path::new("m.gguf"), 1, &opts);
        assert_eq!(count(&args, "--model-draft"), 0);
    }

    #[test]
    fn test_user_flag_replaces_builtin() {
        let mut opts = options();
        opts.extra_args = vec!["--ctx-size".into(), "8192".into(), "--flash-attn".into()];
        let args = build_args(Path::new("m.gguf"), 1, &opts);
        assert_eq!(count(&args, "--ctx-size"), 1);
        assert_eq!(value_of(&args, "--ctx-size"), Some("8192"));
        assert!(!args.contains(&"4096".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--flash-attn"));
    }

    #[test]
    fn test_short_alias_replaces_long_builtin() {
        let mut opts = options();
        opts.extra_args = vec!["-ngl".into(), "20".into(), "-t".into(), "2".into()];
        let args = build_args(Path::new("m.gguf"), 1, &opts);
        assert_eq!(count(&args, "--n-gpu-layers"), 0);
        assert_eq!(count(&args, "--threads"), 0);
        assert_eq!(value_of(&args, "-ngl"), Some("20"));
        assert_eq!(value_of(&args, "-t"), Some("2"));
    }

    #[test]
    fn test_equals_form_counts_as_key() {
        let mut opts = options();
        opts.extra_args = vec!["--port=9000".into()];
        let args = build_args(Path::new("m.gguf"), 4579, &opts);
        assert_eq!(count(&args, "--port"), 0);
        assert!(args.contains(&"--port=9000".to_string()));
    }

    #[test]
    fn test_negative_values_are_not_keys() {
        assert_eq!(flag_key("-1"), None);
        assert_eq!(flag_key("0.5"), None);
        assert_eq!(flag_key("-c"), Some("--ctx-size".to_string()));
        assert_eq!(flag_key("--gpu-layers=3"), Some("--n-gpu-layers".to_string()));
    }
}
