/// Share of a voter's reputation carried by each of their outstanding votes.
///
/// A voter's total influence is their own reputation, split evenly over
/// every vote they currently have out in the tag. Non-positive reputations
/// carry nothing.
pub fn per_vote_weight(voter_reputation: f64, outgoing_vote_count: usize) -> f64 {
    if !(voter_reputation > 0.0) {
        return 0.0;
    }
    voter_reputation / outgoing_vote_count.max(1) as f64
}
