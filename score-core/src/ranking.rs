use score_types::{LeaderboardEntry, LeaderboardTiers, RankingCandidate, RankingWindow, UserId};

pub struct RankingProjector;

impl RankingProjector {
    pub const DEFAULT_TOP_SIZE: usize = 3;

    /// Order candidates into a leaderboard.
    ///
    /// Scores of zero or below are not ranked. Higher scores come first and
    /// equal scores are ordered by user id, so the output does not depend on
    /// input order. Ranks are dense and 1-based.
    pub fn project<I>(candidates: I) -> Vec<LeaderboardEntry>
    where
        I: IntoIterator<Item = RankingCandidate>,
    {
        let mut ranked: Vec<RankingCandidate> =
            candidates.into_iter().filter(|c| c.score > 0).collect();

        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.user_id.cmp(&b.user_id)));

        ranked
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| LeaderboardEntry {
                user_id: candidate.user_id,
                nickname: candidate.nickname,
                score: candidate.score,
                rank: (index + 1) as u32,
            })
            .collect()
    }

    /// Split a ranked leaderboard into the first `top_size` entries and the rest.
    pub fn partition(
        mut sorted: Vec<LeaderboardEntry>,
        top_size: usize,
    ) -> (Vec<LeaderboardEntry>, Vec<LeaderboardEntry>) {
        let rest = sorted.split_off(top_size.min(sorted.len()));
        (sorted, rest)
    }

    pub fn tiers<I>(window: RankingWindow, candidates: I, top_size: usize) -> LeaderboardTiers
    where
        I: IntoIterator<Item = RankingCandidate>,
    {
        let (top, rest) = Self::partition(Self::project(candidates), top_size);
        LeaderboardTiers { window, top, rest }
    }

    pub fn rank_of(entries: &[LeaderboardEntry], user_id: &UserId) -> Option<u32> {
        entries
            .iter()
            .find(|entry| entry.user_id == *user_id)
            .map(|entry| entry.rank)
    }
}
