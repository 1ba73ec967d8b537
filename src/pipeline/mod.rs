//! Stage orchestration
//!
//! Stages run strictly in order; each consumes the previous stage's value.
//! Acquisition, trimming, QC and quantification shell out to external
//! tools, modeling and reporting run in-process.

mod comparison;
mod report;

pub use comparison::Comparison;
pub use report::{ComparisonReport, EnrichmentSummary, OutputLayout, RunSummary};

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use ndarray::{Array2, Axis};

use crate::annotation::{self, strip_version, SymbolMap, Thresholds};
use crate::config::{Config, GeneIdKind};
use crate::data::{CountDataSet, CountMatrix, SampleMetadata, SampleSheet, GROUP_FACTOR, TREATMENT_FACTOR};
use crate::enrichment::{self, GeneSets, GseaParams, OraParams};
use crate::error::{PipelineError, Result};
use crate::glm::{fit_glm, GlmFitParams};
use crate::io::{read_count_matrix, write_count_matrix, write_matrix, write_results, write_significant, DeResults};
use crate::normalization::estimate_normalization_factors;
use crate::plots;
use crate::qc::{self, ReadStats};
use crate::quant::{load_samples, summarize_to_genes, Tx2Gene};
use crate::shrinkage;
use crate::testing::{self, ResultsParams};
use crate::tools::{self, SampleReads};
use crate::transform::{vst, VstResult};

/// Filtered gene counts shared by every design, with optional length offsets
struct GeneTable {
    counts: CountMatrix,
    lengths: Option<Array2<f64>>,
    genes_quantified: usize,
}

pub struct Pipeline {
    config: Config,
    layout: OutputLayout,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let layout = OutputLayout::new(&config.project.output_dir);
        Self {
            config,
            layout,
            dry_run: false,
        }
    }

    /// Log external commands instead of running them
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn sample_sheet(&self) -> Result<SampleSheet> {
        SampleSheet::from_path(&self.config.samples.sheet)
    }

    /// Download reads for every sample
    pub fn fetch(&self, sheet: &SampleSheet) -> Result<Vec<SampleReads>> {
        log::info!("Acquiring reads for {} samples", sheet.len());
        tools::acquire_all(sheet, &self.config, self.dry_run)
    }

    /// FASTQ files expected in the raw read directory
    pub fn local_reads(&self, sheet: &SampleSheet) -> Vec<SampleReads> {
        sheet
            .samples()
            .iter()
            .map(|s| SampleReads {
                sample: s.id.clone(),
                reads: tools::sra::fastq_paths(&self.config.samples.raw_dir, &s.id, self.config.acquisition.paired),
            })
            .collect()
    }

    /// fastqc reports plus `qc/read_stats.json`
    pub fn qc(&self, reads: &[SampleReads]) -> Result<Vec<ReadStats>> {
        let stats = qc::run_qc(reads, &self.config, &self.layout.qc_dir(), self.dry_run)?;
        if !stats.is_empty() {
            qc::stats::write_json(self.layout.read_stats(), &stats)?;
            log::info!("Read statistics for {} files written to {}", stats.len(), self.layout.read_stats().display());
        }
        Ok(stats)
    }

    pub fn trim(&self, reads: &[SampleReads]) -> Result<Vec<SampleReads>> {
        qc::trim_all(reads, &self.config, self.dry_run)
    }

    pub fn quantify(&self, reads: &[SampleReads]) -> Result<Vec<PathBuf>> {
        log::info!("Quantifying {} samples with salmon", reads.len());
        tools::quantify_all(reads, &self.config, self.dry_run)
    }

    /// Every stage from read acquisition to the report
    pub fn run(&self) -> Result<RunSummary> {
        let sheet = self.sample_sheet()?;
        let raw = self.fetch(&sheet)?;
        let trimmed = self.trim(&raw)?;
        let mut qc_reads = raw.clone();
        if self.config.trimming.enabled {
            qc_reads.extend(trimmed.iter().cloned());
        }
        self.qc(&qc_reads)?;
        self.quantify(&trimmed)?;
        if self.dry_run {
            log::info!("Dry run: skipping modeling");
            return Ok(RunSummary {
                samples: sheet.ids(),
                ..RunSummary::default()
            });
        }
        self.run_modeling()
    }

    /// Statistical modeling and reporting from existing quantifications (or
    /// a gene count table when `samples.count_matrix` is set)
    pub fn run_modeling(&self) -> Result<RunSummary> {
        let cfg = &self.config;
        let sheet = self.sample_sheet()?;
        let metadata = sheet.metadata()?;
        self.layout.create()?;

        let table = self.gene_table(&sheet)?;
        write_count_matrix(self.layout.counts_filtered(), &table.counts)?;

        let symbols = cfg.annotation.symbols.as_ref().map(SymbolMap::from_path).transpose()?;
        let gene_sets = cfg.enrichment.gene_sets.as_ref().map(GeneSets::from_gmt).transpose()?;

        let mut summary = RunSummary {
            samples: sheet.ids(),
            genes_quantified: table.genes_quantified,
            genes_after_filter: table.counts.n_genes(),
            ..RunSummary::default()
        };

        let pairwise: Vec<Comparison> = cfg
            .comparisons
            .pairwise
            .iter()
            .map(|[num, den]| Comparison::new(GROUP_FACTOR, num, den))
            .collect();
        let pooled: Option<Comparison> = match cfg.comparisons.pooled.as_slice() {
            [num, den] => Some(Comparison::new(TREATMENT_FACTOR, num, den)),
            _ => None,
        };

        let mut group_dds = self.prepare_dataset(&table, &metadata, GROUP_FACTOR, &pairwise)?;
        let normalized = group_dds.normalized_counts().ok_or_else(|| PipelineError::InvalidInput {
            reason: "normalization factors were not estimated".to_string(),
        })?;
        write_matrix(
            self.layout.normalized_counts(),
            normalized.view(),
            table.counts.gene_ids(),
            table.counts.sample_ids(),
        )?;

        let transformed = vst(&group_dds, true, cfg.model.fit_type)?;
        write_matrix(
            self.layout.vst(),
            transformed.data.view(),
            &transformed.gene_ids,
            &transformed.sample_ids,
        )?;
        let groups: Vec<String> = sheet.samples().iter().map(|s| s.group.clone()).collect();
        summary.pca = Some(if cfg.plots.enabled {
            plots::pca::plot(
                transformed.data.view(),
                &transformed.sample_ids,
                &groups,
                cfg.plots.pca_top_genes,
                &self.layout.figure("pca"),
            )?
        } else {
            plots::pca::compute(transformed.data.view(), &transformed.sample_ids, cfg.plots.pca_top_genes)?
        });

        let mut all_results = Vec::new();
        for comparison in &pairwise {
            all_results.push(self.test_comparison(&mut group_dds, comparison, symbols.as_ref())?);
        }
        if let Some(comparison) = &pooled {
            let mut pooled_dds =
                self.prepare_dataset(&table, &metadata, TREATMENT_FACTOR, std::slice::from_ref(comparison))?;
            all_results.push(self.test_comparison(&mut pooled_dds, comparison, symbols.as_ref())?);
        }

        for (res, reversed) in &all_results {
            write_results(self.layout.de(&res.name), res)?;
            write_significant(self.layout.significant(&res.name), res)?;
            if cfg.plots.enabled {
                self.plot_comparison(res, &transformed)?;
            }
            let enrichment = match &gene_sets {
                Some(sets) => Some(self.run_enrichment(res, sets)?),
                None => None,
            };
            summary.comparisons.push(ComparisonReport {
                results: res.summary(cfg.model.alpha),
                factor: res.factor.clone(),
                reversed: *reversed,
                shrinkage: res.shrinkage.clone(),
                enrichment,
            });
        }

        let sets: Vec<(String, BTreeSet<String>)> = all_results
            .iter()
            .map(|(res, _)| {
                let genes = res.significant_indices().into_iter().map(|i| res.gene_ids[i].clone()).collect();
                (res.name.clone(), genes)
            })
            .collect();
        summary.overlap = if cfg.plots.enabled && !sets.is_empty() {
            plots::overlap::plot(&sets, &self.layout.figure("overlap"))?
        } else {
            plots::overlap::intersections(&sets)
        };
        let names: Vec<String> = sets.iter().map(|(n, _)| n.clone()).collect();
        plots::overlap::write_intersections(self.layout.overlap(), &names, &summary.overlap)?;

        summary.write(self.layout.summary())?;
        log::info!("Run summary written to {}", self.layout.summary().display());
        Ok(summary)
    }

    /// Gene counts from `samples.count_matrix` or the salmon outputs,
    /// filtered for low counts
    fn gene_table(&self, sheet: &SampleSheet) -> Result<GeneTable> {
        let cfg = &self.config;
        let (counts, abundance) = match &cfg.samples.count_matrix {
            Some(path) => {
                log::info!("Reading gene counts from {}", path.display());
                (read_count_matrix(path)?.reorder_samples(&sheet.ids())?, None)
            }
            None => {
                let tx2gene_path = cfg.quantification.tx2gene.as_ref().ok_or_else(|| PipelineError::Config {
                    reason: "quantification.tx2gene is required to summarize salmon output".to_string(),
                })?;
                let tx2gene = Tx2Gene::from_path(tx2gene_path)?;
                let quants = load_samples(&cfg.samples.quant_dir, sheet)?;
                let abundance = summarize_to_genes(&quants, &tx2gene)?;
                (abundance.to_count_matrix()?, Some(abundance))
            }
        };
        write_count_matrix(self.layout.counts_raw(), &counts)?;
        for (sample, size) in counts.sample_ids().iter().zip(counts.library_sizes()) {
            log::debug!("{}: {:.0} assigned reads", sample, size);
        }

        let filtered = counts.filter_low_counts(cfg.filtering.min_count, cfg.filtering.min_samples)?;
        let lengths = match abundance {
            Some(a) if cfg.quantification.length_offsets => {
                Some(a.select_genes(filtered.gene_ids())?.length_offsets())
            }
            _ => None,
        };
        Ok(GeneTable {
            genes_quantified: counts.n_genes(),
            counts: filtered,
            lengths,
        })
    }

    /// Dataset under `~factor` with normalization, dispersions and a GLM fit
    /// against the reference level of the first comparison
    fn prepare_dataset(
        &self,
        table: &GeneTable,
        metadata: &SampleMetadata,
        factor: &str,
        comparisons: &[Comparison],
    ) -> Result<CountDataSet> {
        let control = &self.config.comparisons.control;
        let reference = comparisons.first().map(|c| c.canonical(control).denominator);
        let mut dds = CountDataSet::with_factor(table.counts.clone(), metadata.clone(), factor, reference.as_deref())?;
        log::info!("Fitting design ~{} on {} genes", factor, dds.n_genes());

        if let Some(lengths) = &table.lengths {
            estimate_normalization_factors(&mut dds, lengths)?;
        }
        crate::run_de(&mut dds, self.config.model.fit_type)?;
        Ok(dds)
    }

    /// Test, shrink, annotate and flag one comparison. The canonical
    /// orientation is fitted; reversed comparisons are exact negations.
    fn test_comparison(
        &self,
        dds: &mut CountDataSet,
        comparison: &Comparison,
        symbols: Option<&SymbolMap>,
    ) -> Result<(DeResults, bool)> {
        let cfg = &self.config;
        let canonical = comparison.canonical(&cfg.comparisons.control);
        let reversed = comparison.is_reversed(&cfg.comparisons.control);

        dds.relevel(&canonical.denominator)?;
        if dds.fit().is_none() {
            fit_glm(dds, &GlmFitParams::default())?;
        }
        let params = ResultsParams {
            alpha: cfg.model.alpha,
            independent_filtering: cfg.model.independent_filtering,
            cooks_filter: cfg.model.cooks_filter,
            cooks_cutoff: cfg.model.cooks_cutoff,
        };
        let mut res = testing::results(dds, &canonical.name(), &canonical.numerator, &canonical.denominator, &params)?;
        shrinkage::shrink(dds, &mut res, cfg.model.shrinkage)?;

        let mut res = if reversed { res.reversed(&comparison.name()) } else { res };
        if let Some(map) = symbols {
            let found = annotation::annotate(&mut res, map);
            log::debug!("{}: {} of {} genes have a symbol", res.name, found, res.n_genes());
        }
        annotation::flag(
            &mut res,
            &Thresholds {
                lfc: cfg.significance.lfc_threshold,
                padj: cfg.significance.padj_threshold,
            },
        );
        Ok((res, reversed))
    }

    fn plot_comparison(&self, res: &DeResults, transformed: &VstResult) -> Result<()> {
        let cfg = &self.config;
        let thresholds = Thresholds {
            lfc: cfg.significance.lfc_threshold,
            padj: cfg.significance.padj_threshold,
        };
        plots::volcano::plot(res, &thresholds, cfg.plots.volcano_labels, &self.layout.figure(&format!("volcano_{}", res.name)))?;
        plots::ma::plot(res, &self.layout.figure(&format!("ma_{}", res.name)))?;

        let mut top = res.significant_indices();
        top.sort_by(|&a, &b| res.padj[a].total_cmp(&res.padj[b]));
        top.truncate(cfg.plots.heatmap_genes);
        if top.len() < 2 {
            log::info!("{}: fewer than two significant genes, no heatmap", res.name);
            return Ok(());
        }
        let rows = transformed.data.select(Axis(0), &top);
        let labels: Vec<String> = top.iter().map(|&i| display_label(res, i)).collect();
        plots::heatmap::plot(
            plots::heatmap::row_zscores(rows.view()).view(),
            &labels,
            &transformed.sample_ids,
            &self.layout.figure(&format!("heatmap_{}", res.name)),
        )
    }

    /// ORA of the up- and down-regulated genes against all tested genes,
    /// and GSEA on the Wald statistic
    fn run_enrichment(&self, res: &DeResults, sets: &GeneSets) -> Result<EnrichmentSummary> {
        let cfg = &self.config.enrichment;
        let ids = enrichment_ids(res, cfg.id_kind);
        let pick = |indices: &[usize]| -> Vec<String> { indices.iter().filter_map(|&i| ids[i].clone()).collect() };

        let tested: Vec<usize> = (0..res.n_genes()).filter(|&i| res.pvalues[i].is_finite()).collect();
        let universe = pick(&tested);
        let regulated = annotation::split(res);
        let ora_params = OraParams {
            min_size: cfg.min_set_size,
            max_size: cfg.max_set_size,
        };
        let up = enrichment::enrich(&pick(&regulated.up), &universe, sets, &ora_params);
        let down = enrichment::enrich(&pick(&regulated.down), &universe, sets, &ora_params);
        enrichment::write_ora(self.layout.ora(&res.name, "up"), &up)?;
        enrichment::write_ora(self.layout.ora(&res.name, "down"), &down)?;

        let mut by_strength: Vec<usize> = tested.iter().copied().filter(|&i| res.stat[i].is_finite()).collect();
        by_strength.sort_by(|&a, &b| res.stat[b].abs().total_cmp(&res.stat[a].abs()));
        let mut seen = HashSet::new();
        let ranked: Vec<(String, f64)> = by_strength
            .into_iter()
            .filter_map(|i| ids[i].clone().map(|id| (id, res.stat[i])))
            .filter(|(id, _)| seen.insert(id.clone()))
            .collect();
        let gsea = enrichment::gsea(
            &ranked,
            sets,
            &GseaParams {
                min_size: cfg.min_set_size,
                max_size: cfg.max_set_size,
                permutations: cfg.permutations,
                seed: cfg.seed,
            },
        );
        enrichment::write_gsea(self.layout.gsea(&res.name), &gsea)?;

        let cutoff = cfg.pvalue_cutoff;
        let passing_ora = |terms: &[enrichment::EnrichmentTerm]| -> Vec<enrichment::EnrichmentTerm> {
            terms.iter().filter(|t| t.padj < cutoff).cloned().collect()
        };
        let (up_hits, down_hits) = (passing_ora(&up), passing_ora(&down));
        let gsea_hits: Vec<enrichment::GseaTerm> = gsea.iter().filter(|t| t.padj < cutoff).cloned().collect();

        if self.config.plots.enabled {
            for (terms, direction) in [(&up_hits, "up"), (&down_hits, "down")] {
                if !terms.is_empty() {
                    plots::enrichment::dotplot(
                        terms,
                        20,
                        &format!("{} {}-regulated", res.name, direction),
                        &self.layout.figure(&format!("ora_{}_{}", res.name, direction)),
                    )?;
                }
            }
            if !gsea_hits.is_empty() {
                plots::enrichment::gsea_barplot(
                    &gsea_hits,
                    20,
                    &format!("{} GSEA", res.name),
                    &self.layout.figure(&format!("gsea_{}", res.name)),
                )?;
            }
        }
        log::info!(
            "{}: {} up / {} down ORA terms and {} GSEA terms below {}",
            res.name,
            up_hits.len(),
            down_hits.len(),
            gsea_hits.len(),
            cutoff
        );
        Ok(EnrichmentSummary {
            ora_up: up_hits.len(),
            ora_down: down_hits.len(),
            gsea: gsea_hits.len(),
        })
    }
}

/// Symbol when known, otherwise the gene id
fn display_label(res: &DeResults, i: usize) -> String {
    if res.symbols[i].is_empty() {
        res.gene_ids[i].clone()
    } else {
        res.symbols[i].clone()
    }
}

/// Identifier each gene is known by in the gene sets; genes without a
/// symbol drop out of symbol-keyed enrichment
fn enrichment_ids(res: &DeResults, kind: GeneIdKind) -> Vec<Option<String>> {
    (0..res.n_genes())
        .map(|i| match kind {
            GeneIdKind::Symbol => Some(res.symbols[i].clone()).filter(|s| !s.is_empty()),
            GeneIdKind::Ensembl => Some(strip_version(&res.gene_ids[i]).to_string()),
        })
        .collect()
}
