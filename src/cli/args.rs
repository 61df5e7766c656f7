use clap::{ArgAction, ArgGroup, Parser};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "genoqc-pipelines", version, about = "Genotype QC pipeline over PLINK 2 (pgen/psam/pvar) datasets")]
#[command(group(ArgGroup::new("genotypes").required(true).args(["pfile", "bfile", "vcf"])))]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    // file i/o
    #[arg(long, help = "PLINK 2 genotype prefix (everything before .pgen/.pvar/.psam)")]
    pub pfile: Option<String>,

    #[arg(long, help = "PLINK 1.9 genotype prefix (everything before .bed/.bim/.fam); converted to pgen before QC")]
    pub bfile: Option<String>,

    #[arg(long, help = "VCF genotype file; converted to pgen before QC")]
    pub vcf: Option<String>,

    #[arg(short = 'o', long = "out", required = true, help = "Prefix for output (including path)")]
    pub out: String,

    #[arg(long = "full-output", default_value_t = true, action = ArgAction::Set, help = "Keep every intermediate dataset next to the output; false keeps only the final dataset")]
    pub full_output: bool,

    #[arg(long = "skip-fails", action, help = "Skip the up-front check for steps that are bound to fail")]
    pub skip_fails: bool,

    #[arg(long, action, help = "Warn on a failing step and continue with the last valid dataset")]
    pub warn: bool,

    #[clap(long, value_delimiter = ',', help = "Explicit comma-separated step order (e.g. callrate,geno,hwe); missing parameters use defaults")]
    pub steps: Option<Vec<String>>,

    #[arg(long = "tmp-dir", help = "Parent directory for the scratch area; defaults to the system temp dir")]
    pub tmp_dir: Option<String>,

    #[arg(long, default_value_t = 64)]
    pub threads: usize,

    #[arg(long, help = "Memory budget for plink2 in MB; defaults to half of available RAM")]
    pub memory: Option<u64>,

    // ancestry
    #[arg(long, action, help = "Split by ancestry")]
    pub ancestry: bool,

    #[arg(long = "ref-panel", help = "PLINK reference panel prefix for ancestry prediction")]
    pub ref_panel: Option<String>,

    #[arg(long = "ref-labels", help = "Tab-separated FID IID label file for the reference panel, no header")]
    pub ref_labels: Option<String>,

    #[arg(long, help = "Trained ancestry model for the reference panel")]
    pub model: Option<String>,

    #[arg(long, action, help = "Run ancestry predictions in a container")]
    pub container: bool,

    #[arg(long, action, help = "Use singularity for containerized predictions")]
    pub singularity: bool,

    #[arg(long = "subset-ancestry", num_args = 1.., help = "Ancestry labels to continue analysis for")]
    pub subset_ancestry: Option<Vec<String>>,

    // sample-level qc
    #[arg(long, num_args = 0..=1, default_missing_value = "0.02", help = "Minimum callrate threshold")]
    pub callrate: Option<f64>,

    #[arg(long, num_args = 0..=2, default_missing_values = ["0.25", "0.75"], allow_negative_numbers = true, help = "Sex check F cutoffs (female upper, male lower)")]
    pub sex: Option<Vec<f64>>,

    #[arg(long, action, help = "Relatedness prune")]
    pub related: bool,

    #[arg(long = "related-cutoff", default_value_t = 0.0884)]
    pub related_cutoff: f64,

    #[arg(long = "duplicated-cutoff", default_value_t = 0.354)]
    pub duplicated_cutoff: f64,

    #[arg(long = "prune-related", default_value_t = false, action = ArgAction::Set)]
    pub prune_related: bool,

    #[arg(long = "prune-duplicated", default_value_t = true, action = ArgAction::Set)]
    pub prune_duplicated: bool,

    #[arg(long, num_args = 0..=2, default_missing_values = ["-0.25", "0.25"], allow_negative_numbers = true, help = "Heterozygosity F cutoffs (low high)")]
    pub het: Option<Vec<f64>>,

    #[arg(long = "all-sample", action, help = "Run all sample-level QC")]
    pub all_sample: bool,

    // variant-level qc
    #[arg(long, num_args = 0..=1, default_missing_value = "0.05", help = "Maximum variant missingness")]
    pub geno: Option<f64>,

    #[arg(long = "case-control", num_args = 0..=1, default_missing_value = "0.0001", help = "Case/control differential missingness p-value")]
    pub case_control: Option<f64>,

    #[arg(long, num_args = 0..=1, default_missing_value = "0.0001", help = "Haplotype missingness p-value")]
    pub haplotype: Option<f64>,

    #[arg(long, num_args = 0..=1, default_missing_value = "0.0001", help = "Hardy-Weinberg p-value threshold")]
    pub hwe: Option<f64>,

    #[arg(long = "filter-controls", action, help = "Compute HWE on controls only")]
    pub filter_controls: bool,

    #[arg(long, num_args = 0..=3, default_missing_values = ["50", "5", "0.5"], help = "LD prune with window size, step size, r2 threshold")]
    pub ld: Option<Vec<String>>,

    #[arg(long = "all-variant", action, help = "Run all variant-level QC")]
    pub all_variant: bool,

    // association
    #[arg(long, num_args = 0..=1, default_missing_value = "10", help = "PCA with this many components")]
    pub pca: Option<u32>,

    #[arg(long, default_value = "hg38", help = "Genome build for PCA")]
    pub build: String,

    #[arg(long, action, help = "Run GWAS")]
    pub gwas: bool,

    #[arg(long, help = "External covariates file")]
    pub covars: Option<String>,

    #[clap(long = "covar-names", value_delimiter = ',', help = "Comma-separated covariate names from the external file")]
    pub covar_names: Option<Vec<String>>,
}
