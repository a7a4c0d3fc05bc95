//! Minimal VCF output for called variants.

use std::io::Write;

use anyhow::Result;

use crate::variant::Variant;

/// Writes the VCF header: file format, contigs from the draft, and the
/// FILTER/FORMAT lines the records reference.
pub fn write_vcf_header<W: Write>(
    writer: &mut W,
    draft_lens: &[(String, i64)],
    version: &str,
) -> Result<()> {
    writeln!(writer, "##fileformat=VCFv4.2")?;
    writeln!(writer, "##source=burnish {version}")?;
    for (name, len) in draft_lens {
        writeln!(writer, "##contig=<ID={name},length={len}>")?;
    }
    writeln!(writer, "##FILTER=<ID=PASS,Description=\"All filters passed\">")?;
    writeln!(writer, "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">")?;
    writeln!(writer, "##FORMAT=<ID=GQ,Number=1,Type=Float,Description=\"Genotype quality\">")?;
    writeln!(writer, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE")?;
    Ok(())
}

/// Writes one variant record; positions become 1-based on output.
pub fn write_vcf_record<W: Write>(
    writer: &mut W,
    draft_lens: &[(String, i64)],
    variant: &Variant,
) -> Result<()> {
    let chrom = &draft_lens[variant.seq_id as usize].0;
    let format: Vec<&str> = variant.genotype.iter().map(|(k, _)| k.as_str()).collect();
    let values: Vec<&str> = variant.genotype.iter().map(|(_, v)| v.as_str()).collect();
    writeln!(
        writer,
        "{chrom}\t{pos}\t.\t{ref_allele}\t{alt_allele}\t{qual:.3}\t{filter}\t.\t{format}\t{values}",
        pos = variant.pos + 1,
        ref_allele = variant.ref_allele,
        alt_allele = variant.alt_allele,
        qual = variant.qual,
        filter = variant.filter,
        format = format.join(":"),
        values = values.join(":"),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_variant() -> Variant {
        Variant {
            seq_id: 0,
            pos: 2,
            ref_allele: "G".to_string(),
            alt_allele: "C".to_string(),
            filter: "PASS".to_string(),
            qual: 62.5,
            genotype: vec![
                ("GT".to_string(), "1".to_string()),
                ("GQ".to_string(), "62.500".to_string()),
            ],
        }
    }

    #[test]
    fn test_header_contains_contigs() {
        let mut out = Vec::new();
        let drafts = vec![("ctg1".to_string(), 100), ("ctg2".to_string(), 50)];
        write_vcf_header(&mut out, &drafts, "1.0").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("##fileformat=VCFv4.2\n"));
        assert!(text.contains("##contig=<ID=ctg1,length=100>"));
        assert!(text.contains("##contig=<ID=ctg2,length=50>"));
        assert!(text.ends_with("FORMAT\tSAMPLE\n"));
    }

    #[test]
    fn test_record_is_one_based() {
        let mut out = Vec::new();
        let drafts = vec![("ctg1".to_string(), 100)];
        write_vcf_record(&mut out, &drafts, &test_variant()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "ctg1\t3\t.\tG\tC\t62.500\tPASS\t.\tGT:GQ\t1:62.500\n");
    }
}
