/// A pending task offered for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionCandidate {
    pub key: usize,
    pub expected_memory: u64,
}

/// First-fit packing: walk the candidates in order and take every one whose
/// expected memory fits in what is left, until `free_slots` are used or the
/// memory runs out.
///
/// When nothing is running and nothing fits, the first candidate is admitted
/// anyway so an oversized task cannot stall the run.
pub fn first_fit(
    candidates: &[AdmissionCandidate],
    available_memory: u64,
    free_slots: usize,
    nothing_running: bool,
) -> Vec<usize> {
    let mut chosen = Vec::new();
    let mut taken = vec![false; candidates.len()];
    let mut available = available_memory;

    while available > 0 && chosen.len() < free_slots {
        let next = candidates
            .iter()
            .enumerate()
            .find(|(i, c)| !taken[*i] && c.expected_memory < available);

        match next {
            Some((i, candidate)) => {
                taken[i] = true;
                chosen.push(candidate.key);
                available -= candidate.expected_memory;
            }
            None => break,
        }
    }

    if chosen.is_empty() && nothing_running && free_slots > 0 {
        if let Some(first) = candidates.first() {
            chosen.push(first.key);
        }
    }

    chosen
}
