mod common;

use common::Cluster;

#[test]
fn quorum_commit_executes_request_on_every_honest_node() {
    let mut cluster = Cluster::new(&["A", "B", "C", "D"]);
    cluster.submit_and_drain(b"set x 1".to_vec());

    for node in &mut cluster.nodes {
        let executed = node.take_executed();
        assert_eq!(executed.len(), 1, "{} must execute exactly once", node.node_id());
        assert_eq!(executed[0].sequence, 1);
        assert_eq!(executed[0].request, b"set x 1".to_vec());
    }
}

#[test]
fn requests_execute_in_sequence_order_on_every_node() {
    let mut cluster = Cluster::new(&["A", "B", "C", "D"]);
    cluster.submit_and_drain(b"cmd1".to_vec());
    cluster.submit_and_drain(b"cmd2".to_vec());
    cluster.submit_and_drain(b"cmd3".to_vec());

    for node in &mut cluster.nodes {
        let executed = node.take_executed();
        let seqs: Vec<u64> = executed.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3], "total order (P1) violated on {}", node.node_id());
    }
}

#[test]
fn a_single_slow_node_still_converges_once_it_catches_up() {
    // 7 nodes -> f=2, quorum=5. Drop one honest node's outbound traffic so
    // only 6 of 7 actually participate; quorum is still reached.
    let mut cluster = Cluster::new(&["A", "B", "C", "D", "E", "F", "G"]);
    cluster.drop_messages_from("G");
    cluster.submit_and_drain(b"op".to_vec());

    for node in &mut cluster.nodes {
        if node.node_id() == "G" {
            continue;
        }
        let executed = node.take_executed();
        assert_eq!(executed.len(), 1);
    }
}
