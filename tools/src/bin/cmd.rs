// Command line utility for running the scan-prep recipe

use anyhow::{bail, Context, Error};
use clap::{value_parser, Arg, ArgAction, Command};
use env_logger::Env;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::prelude::*;
use scan_prep::{apply_recipe, concat, read, CombatOptions, ConcatOptions, JoinKind, ReadOptions, RecipeConfig};
use scan_types::{AnnMatrix, Annotations};
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

/// Split `NAME=PATH`; a bare path is named after its file name without extensions.
fn parse_input(arg: &str) -> (String, PathBuf) {
    if let Some((name, path)) = arg.split_once('=') {
        return (name.to_string(), PathBuf::from(path));
    }
    let path = PathBuf::from(arg);
    let name = path
        .file_name()
        .and_then(|f| f.to_str())
        .and_then(|f| f.split('.').next())
        .unwrap_or(arg)
        .to_string();
    (name, path)
}

fn parse_delimiter(sep: &str) -> Result<u8, Error> {
    match sep {
        "\\t" | "tab" => Ok(b'\t'),
        s if s.len() == 1 => Ok(s.as_bytes()[0]),
        s => bail!("separator must be a single character, got '{}'", s),
    }
}

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = Command::new("scan-prep-cmd")
        .about("Load single-cell expression matrices, filter and normalize them")
        .arg(
            Arg::new("INPUT")
                .help("Input matrix (.csv, .txt, .h5, .mtx, optionally .gz), as NAME=PATH or PATH")
                .required(true)
                .num_args(1..)
                .index(1),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out-dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("SEP")
                .help("Field separator of text inputs")
                .long("sep")
                .default_value("\\t"),
        )
        .arg(
            Arg::new("NO_HEADER")
                .help("Text inputs have no header row of cell names")
                .long("no-header")
                .action(ArgAction::SetTrue)
                .conflicts_with("HEADER"),
        )
        .arg(
            Arg::new("HEADER")
                .help("Row of text inputs holding the cell names")
                .long("header")
                .default_value("0")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("INDEX_COL")
                .help("Column of text inputs holding the gene names; negative for none")
                .long("index-col")
                .default_value("0")
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64)),
        )
        .arg(
            Arg::new("JOIN")
                .help("How to match genes across inputs")
                .long("join")
                .default_value("inner")
                .value_parser(["inner", "outer"]),
        )
        .arg(
            Arg::new("SAMPLE_KEY")
                .help("obs column recording the input of each cell")
                .long("sample-key")
                .default_value("batch"),
        )
        .arg(
            Arg::new("INDEX_UNIQUE")
                .help("Separator between cell name and input name; empty to keep names unchanged")
                .long("index-unique")
                .default_value("-"),
        )
        .arg(
            Arg::new("COMBAT_KEY")
                .help("Run ComBat on the combined inputs with batches from this obs column")
                .long("combat-key"),
        )
        .arg(
            Arg::new("COVARIATE")
                .help("obs column whose effect ComBat preserves")
                .long("covariate")
                .action(ArgAction::Append)
                .requires("COMBAT_KEY"),
        )
        .arg(
            Arg::new("CONFIG")
                .help("JSON file with recipe parameters")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PLOT")
                .help("Write violin plots of the QC metrics to the output directory")
                .long("plot")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let out_dir: &PathBuf = matches.get_one("OUT_DIR").unwrap();
    let read_options = ReadOptions {
        header: if matches.get_flag("NO_HEADER") {
            None
        } else {
            matches.get_one::<usize>("HEADER").copied()
        },
        index_col: usize::try_from(*matches.get_one::<i64>("INDEX_COL").unwrap()).ok(),
        delimiter: parse_delimiter(matches.get_one::<String>("SEP").unwrap())?,
        gex_only: true,
    };
    let mut config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => RecipeConfig::from_json_file(path)?,
        None => RecipeConfig::default(),
    };
    if matches.get_flag("PLOT") {
        config.plot = true;
        config.plot_dir = out_dir.clone();
    }

    if !out_dir.exists() {
        create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    }

    let mut datasets = Vec::new();
    for arg in matches.get_many::<String>("INPUT").unwrap() {
        let (name, path) = parse_input(arg);
        datasets.push((name, read(&path, &read_options)?));
    }

    let adata = if datasets.len() == 1 && !matches.contains_id("COMBAT_KEY") {
        datasets.remove(0).1
    } else {
        let index_unique = matches.get_one::<String>("INDEX_UNIQUE").unwrap();
        let options = ConcatOptions {
            join: matches.get_one::<String>("JOIN").unwrap().parse::<JoinKind>()?,
            sample_key: matches.get_one::<String>("SAMPLE_KEY").unwrap().clone(),
            batch_categories: None,
            index_unique: Some(index_unique.clone()).filter(|s| !s.is_empty()),
            combat: matches.get_one::<String>("COMBAT_KEY").map(|key| CombatOptions {
                key: key.clone(),
                covariates: matches
                    .get_many::<String>("COVARIATE")
                    .map(|c| c.cloned().collect())
                    .unwrap_or_default(),
            }),
        };
        concat(datasets, &options)?
    };

    let adata = apply_recipe(adata, &config)?;
    write_outputs(&adata, out_dir)?;
    info!("wrote {} cells x {} genes to {}", adata.n_obs(), adata.n_vars(), out_dir.display());
    Ok(())
}

fn write_outputs(adata: &AnnMatrix, out_dir: &Path) -> Result<(), Error> {
    array_to_csv(
        adata.x().to_dense(),
        adata.obs_names(),
        adata.var_names(),
        out_dir.join("matrix.csv.gz"),
    )?;
    annotations_to_csv(adata.obs(), adata.obs_names(), out_dir.join("obs.csv.gz"))
}

fn gz_writer(path: &Path) -> Result<csv::Writer<GzEncoder<File>>, Error> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    Ok(csv::Writer::from_writer(GzEncoder::new(file, Compression::default())))
}

/// Write a matrix as gzipped CSV with a header row of column labels and a leading label column.
pub fn array_to_csv(
    array: Array2<f64>,
    row_names: &[String],
    col_names: &[String],
    path: impl AsRef<Path>,
) -> Result<(), Error> {
    let mut writer = gz_writer(path.as_ref())?;
    writer.write_record(std::iter::once("").chain(col_names.iter().map(String::as_str)))?;
    for (name, row) in row_names.iter().zip(array.axis_iter(Axis(0))) {
        let mut record = vec![name.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.into_inner().map_err(|e| e.into_error())?.finish()?;
    Ok(())
}

fn annotations_to_csv(ann: &Annotations, row_names: &[String], path: impl AsRef<Path>) -> Result<(), Error> {
    let mut writer = gz_writer(path.as_ref())?;
    writer.write_record(std::iter::once("").chain(ann.names()))?;
    let columns: Vec<Vec<String>> = ann.iter().map(|(_, col)| col.to_text()).collect();
    for (i, name) in row_names.iter().enumerate() {
        writer.write_record(std::iter::once(name.as_str()).chain(columns.iter().map(|col| col[i].as_str())))?;
    }
    writer.into_inner().map_err(|e| e.into_error())?.finish()?;
    Ok(())
}

#[cfg(test)]
mod test_cmd {
    use super::*;
    use flate2::read::GzDecoder;
    use ndarray::array;
    use scan_types::Column;

    fn read_back(path: &Path) -> Vec<Vec<String>> {
        let file = File::open(path).unwrap();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(GzDecoder::new(file));
        reader
            .records()
            .map(|r| r.unwrap().iter().map(|f| f.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_labels_are_quoted() {
        let dir = std::env::temp_dir().join(format!("scan-prep-cmd-{}", std::process::id()));
        create_dir_all(&dir).unwrap();
        let rows = vec!["AAAC-1,a".to_string(), "say \"hi\"".to_string()];
        let cols = vec!["Gene,1".to_string(), "mt-Co1".to_string()];

        let path = dir.join("matrix.csv.gz");
        array_to_csv(array![[1.0, 0.5], [0.0, 2.0]], &rows, &cols, &path).unwrap();
        let records = read_back(&path);
        assert_eq!(records[0], vec!["", "Gene,1", "mt-Co1"]);
        assert_eq!(records[1], vec!["AAAC-1,a", "1", "0.5"]);
        assert_eq!(records[2], vec!["say \"hi\"", "0", "2"]);

        let mut ann = Annotations::new(2);
        ann.insert("sample, name", Column::Text(vec!["x,y".to_string(), "z".to_string()]))
            .unwrap();
        let path = dir.join("obs.csv.gz");
        annotations_to_csv(&ann, &rows, &path).unwrap();
        let records = read_back(&path);
        assert_eq!(records[0], vec!["", "sample, name"]);
        assert_eq!(records[1], vec!["AAAC-1,a", "x,y"]);
        assert_eq!(records[2], vec!["say \"hi\"", "z"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("a=data/x.csv"), ("a".to_string(), PathBuf::from("data/x.csv")));
        assert_eq!(parse_input("data/pbmc.csv.gz"), ("pbmc".to_string(), PathBuf::from("data/pbmc.csv.gz")));
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter(",").unwrap(), b',');
        assert!(parse_delimiter("ab").is_err());
    }
}
