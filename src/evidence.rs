use crate::config::EvidenceWeights;
use crate::models::{Bm25Model, EvidenceSentence, SentenceRecord, Vector};
use crate::similarity::cosine_similarity;
use crate::text::{contains_term, tokenize};

/// Mean BM25 score of the signature terms present in `tokens`, scaled by the
/// strongest signature score so the result stays in `[0, 1]`.
fn frequency_salience(tokens: &[String], signature: &[String], bm25: &Bm25Model) -> f64 {
    let max = signature.iter().map(|t| bm25.score(t)).fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return 0.0;
    }
    let matched: Vec<f64> = signature
        .iter()
        .filter(|t| contains_term(tokens, t))
        .map(|t| bm25.score(t))
        .collect();
    if matched.is_empty() {
        return 0.0;
    }
    matched.iter().sum::<f64>() / matched.len() as f64 / max
}

/// Score every member sentence of one concept and keep the best `top_k`.
/// `members` are indices into `sentences`/`vectors`.
pub fn rank_evidence(
    members: &[usize],
    sentences: &[SentenceRecord],
    vectors: &[Vector],
    centroid: &[f64],
    signature: &[String],
    bm25: &Bm25Model,
    weights: &EvidenceWeights,
) -> Vec<EvidenceSentence> {
    let mut scored: Vec<(usize, EvidenceSentence)> = members
        .iter()
        .filter(|&&i| i < sentences.len() && i < vectors.len())
        .map(|&i| {
            let semantic = cosine_similarity(&vectors[i], centroid);
            let frequency = frequency_salience(&tokenize(&sentences[i].text), signature, bm25);
            let ev = EvidenceSentence {
                sentence_id: sentences[i].id.clone(),
                score: weights.semantic * semantic + weights.frequency * frequency,
                semantic,
                frequency,
            };
            (i, ev)
        })
        .collect();
    scored.sort_by(|a, b| b.1.score.total_cmp(&a.1.score).then(a.0.cmp(&b.0)));
    scored.into_iter().take(weights.top_k).map(|(_, e)| e).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stance;
    use approx::assert_abs_diff_eq;

    fn bm25() -> Bm25Model {
        Bm25Model {
            ngram_vocab: vec!["daylight".into(), "atrium".into()],
            scores: [("daylight".to_string(), 4.0), ("atrium".to_string(), 2.0)].into_iter().collect(),
        }
    }

    #[test]
    fn salience_is_scaled_by_strongest_term() {
        let sig = vec!["daylight".to_string(), "atrium".to_string()];
        let tokens = tokenize("The atrium is gloomy");
        assert_abs_diff_eq!(frequency_salience(&tokens, &sig, &bm25()), 0.5, epsilon = 1e-12);
        let none = tokenize("Nothing relevant");
        assert_eq!(frequency_salience(&none, &sig, &bm25()), 0.0);
    }

    #[test]
    fn ranks_by_blended_score_and_truncates() {
        let sentences = vec![
            SentenceRecord::new("s0", "a", "Daylight floods the atrium", Stance::Praise),
            SentenceRecord::new("s1", "b", "Unrelated remark", Stance::Neutral),
            SentenceRecord::new("s2", "c", "The atrium could be brighter", Stance::Suggestion),
        ];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.8, 0.6]];
        let sig = vec!["daylight".to_string(), "atrium".to_string()];
        let weights = EvidenceWeights {
            top_k: 2,
            ..EvidenceWeights::default()
        };
        let ranked = rank_evidence(&[0, 1, 2], &sentences, &vectors, &[1.0, 0.0], &sig, &bm25(), &weights);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].sentence_id, "s0");
        assert_eq!(ranked[1].sentence_id, "s2");
        assert!(ranked[0].score >= ranked[1].score);
    }
}
