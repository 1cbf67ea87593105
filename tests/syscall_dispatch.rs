//! Syscall table tests: register decoding, user copies and resumption

mod common;

use chan_r::ipc::ConnectCommand;
use chan_r::syscall::*;
use chan_r::{ChannelId, KernError, ProcessId, ThreadId};
use common::*;

const PATH_ADDR: usize = 0x1000;
const INFO_ADDR: usize = 0x2000;
const MSG_ADDR: usize = 0x3000;
const DATA_ADDR: usize = 0x5000;

fn call(table: &SyscallTable, kernel: &chan_r::KernelState, tid: ThreadId, sysno: usize, args: &[usize]) -> SyscallReturn {
    table.dispatch(kernel, tid, sysno, &SyscallArgs::with_args(args))
}

fn value(ret: SyscallReturn) -> isize {
    match ret {
        SyscallReturn::Value(v) => v,
        SyscallReturn::Blocked => panic!("syscall blocked"),
    }
}

fn write_path(vm: &FakeVm, pid: ProcessId, path: &str) {
    vm.write(pid, PATH_ADDR, path.as_bytes());
}

#[test]
fn connect_send_receive_through_registers() {
    let (kernel, vm) = kernel();
    let table = SyscallTable::new();
    let (server, ts) = spawn(&kernel);
    let (client, tc) = spawn(&kernel);

    write_path(&vm, server, "srv");
    let pub_ch = value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PUBLIC, PATH_ADDR, 3, 64, 0]));
    assert!(pub_ch > 0);
    let reply_ch = value(call(&table, &kernel, tc, SYS_CHANNEL_OPEN, &[KIND_PRIVATE, 0, 0, 64, 0]));
    assert!(reply_ch > 0);

    write_path(&vm, client, "srv");
    let ret = call(
        &table,
        &kernel,
        tc,
        SYS_CONNECTION_OPEN,
        &[PATH_ADDR, 3, 0, reply_ch as usize, TIMEOUT_INFINITE],
    );
    assert_eq!(ret, SyscallReturn::Blocked);
    assert_eq!(table.resume(&kernel, tc), None);

    // Server takes the request; the info block lands in its memory
    let ret = call(&table, &kernel, ts, SYS_CHANNEL_WAIT_CONNECTION, &[pub_ch as usize, INFO_ADDR, 0]);
    assert_eq!(value(ret), 0);
    let info = vm.read_words(server, INFO_ADDR, CONN_INFO_WORDS);
    assert_eq!(info[0], u64::from(client.0));
    assert_eq!(info[1], u64::from(tc.0));

    let ret = call(
        &table,
        &kernel,
        ts,
        SYS_CHANNEL_COMPLETE_CONNECTION,
        &[pub_ch as usize, ConnectCommand::ACCEPT_DIRECT as usize, 0],
    );
    assert_eq!(value(ret), 0);
    let conid = table.resume(&kernel, tc).unwrap();
    assert_eq!(conid as u64, info[2]);

    // Receive blocks, the send completes it, resume copies the message out
    let ret = call(&table, &kernel, ts, SYS_RECEIVE, &[pub_ch as usize, MSG_ADDR, TIMEOUT_INFINITE]);
    assert_eq!(ret, SyscallReturn::Blocked);

    let mut msg = [0u64; SEND_MSG_WORDS];
    msg[0] = DATA_ADDR as u64;
    msg[1] = 4;
    msg[2] = SYS_MSG_NONE;
    vm.write_words(client, MSG_ADDR, &msg);
    let ret = call(&table, &kernel, tc, SYS_SEND, &[conid as usize, MSG_ADDR, TIMEOUT_INFINITE, 0]);
    assert_eq!(value(ret), 0);

    assert_eq!(table.resume(&kernel, ts), Some(0));
    let received = vm.read_words(server, MSG_ADDR, RECV_MSG_WORDS);
    assert_eq!(received[0], DATA_ADDR as u64);
    assert_eq!(received[1], 4);
    assert_eq!(received[8], u64::from(client.0));
    assert_eq!(received[9], u64::from(tc.0));
    assert_eq!(received[10], conid as u64);
    assert_ne!(received[11], 0, "reply connection expected");

    let stats = table.stats();
    assert_eq!(stats.blocked_calls, 2);
    assert_eq!(stats.failed_calls, 0);
}

#[test]
fn errors_come_back_negative() {
    let (kernel, vm) = kernel();
    let table = SyscallTable::new();
    let (server, ts) = spawn(&kernel);

    assert_eq!(value(call(&table, &kernel, ts, 99, &[])), KernError::IllegalArgs.code());
    // Unknown channel kind
    assert_eq!(
        value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[7, 0, 0, 64, 0])),
        KernError::IllegalArgs.code()
    );
    // Unknown flag bits
    assert_eq!(
        value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PRIVATE, 0, 0, 64, 1 << 20])),
        KernError::IllegalArgs.code()
    );
    // Path that is not UTF-8
    vm.write(server, PATH_ADDR, &[0xFF, 0xFE]);
    assert_eq!(
        value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PUBLIC, PATH_ADDR, 2, 64, 0])),
        KernError::IllegalArgs.code()
    );
    // Closing a channel the caller does not own
    assert_eq!(
        value(call(&table, &kernel, ts, SYS_CHANNEL_CLOSE, &[42])),
        KernError::AccessDenied.code()
    );
    // Connecting by (pid, chid) to nothing
    assert_eq!(
        value(call(&table, &kernel, ts, SYS_CONNECTION_OPEN, &[0, 77, 1, 0, 0])),
        KernError::NoConnection.code()
    );

    let stats = table.stats();
    assert_eq!(stats.invalid_calls, 1);
    assert_eq!(stats.total_calls, 6);
    assert_eq!(stats.failed_calls, 5);
}

#[test]
fn well_known_id_and_timeout_via_registers() {
    let (kernel, _vm) = kernel();
    let table = SyscallTable::new();
    let (server, ts) = spawn(&kernel);
    let (_client, tc) = spawn(&kernel);

    let chid = value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PRIVATE, 0, 5, 64, 0]));
    assert_eq!(chid, 5);
    assert_eq!(
        value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PRIVATE, 0, 5, 64, 0])),
        KernError::AlreadyExists.code()
    );

    let ret = call(&table, &kernel, tc, SYS_CONNECTION_OPEN, &[0, server.0 as usize, 5, 0, 100]);
    assert_eq!(ret, SyscallReturn::Blocked);
    kernel.advance_clock(100);
    assert_eq!(table.resume(&kernel, tc), Some(KernError::Timeout.code()));
    assert_eq!(kernel.connection_count(kernel.thread_process(tc).unwrap()), 0);
}

#[test]
fn signal_syscall_reaches_the_signal_channel() {
    let (kernel, vm) = kernel();
    let table = SyscallTable::new();
    let (target, tt) = spawn(&kernel);
    let (sender, ts) = spawn(&kernel);

    let sig_ch = kernel.open_signal_channel(tt).unwrap();
    let ret = call(&table, &kernel, ts, SYS_SIGNAL, &[target.0 as usize, 15, 3, 0xBEEF]);
    assert_eq!(value(ret), 0);

    let ret = call(&table, &kernel, tt, SYS_RECEIVE, &[sig_ch.0 as usize, MSG_ADDR, 0]);
    assert_eq!(value(ret), 0);
    let received = vm.read_words(target, MSG_ADDR, RECV_MSG_WORDS);
    assert_eq!(received[2], SYS_MSG_SIGNAL);
    assert_eq!(received[3], u64::from(sender.0));
    assert_eq!(received[5], 15);
    assert_eq!(received[6], 3);
    assert_eq!(received[7], 0xBEEF);
    assert_eq!(received[11], 0);
}

#[test]
fn bad_receive_buffer_leaves_the_sender_waiting() {
    let (kernel, vm) = kernel();
    let table = SyscallTable::new();
    let (server, ts) = spawn(&kernel);
    let (client, tc) = spawn(&kernel);

    write_path(&vm, server, "srv");
    let chid = value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PUBLIC, PATH_ADDR, 3, 64, 1]));
    write_path(&vm, client, "srv");
    let conid = value(call(&table, &kernel, tc, SYS_CONNECTION_OPEN, &[PATH_ADDR, 3, 0, 0, 0]));
    assert!(conid > 0);

    let mut msg = [0u64; SEND_MSG_WORDS];
    msg[0] = DATA_ADDR as u64;
    msg[1] = 8;
    vm.write_words(client, MSG_ADDR, &msg);
    let ret = call(&table, &kernel, tc, SYS_SEND, &[conid as usize, MSG_ADDR, TIMEOUT_INFINITE, 0]);
    assert_eq!(ret, SyscallReturn::Blocked);

    // Nowhere to put the message: the call fails before taking it
    let ret = call(&table, &kernel, ts, SYS_RECEIVE, &[chid as usize, 0, TIMEOUT_INFINITE]);
    assert_eq!(value(ret), KernError::IllegalArgs.code());
    assert!(kernel.take_wakeup(tc).is_none());
    assert_eq!(kernel.channel_stats(server, ChannelId(chid as u32)).unwrap().senders, 1);
    assert_eq!(table.pending_copy_outs(), 0);

    let ret = call(&table, &kernel, ts, SYS_RECEIVE, &[chid as usize, MSG_ADDR, TIMEOUT_INFINITE]);
    assert_eq!(value(ret), 0);
    let received = vm.read_words(server, MSG_ADDR, RECV_MSG_WORDS);
    assert_eq!(received[0], DATA_ADDR as u64);
    assert_eq!(received[1], 8);
    assert_eq!(table.resume(&kernel, tc), Some(0));
}

#[test]
fn bad_info_buffer_leaves_the_request_queued() {
    let (kernel, vm) = kernel();
    let table = SyscallTable::new();
    let (server, ts) = spawn(&kernel);
    let (client, tc) = spawn(&kernel);

    write_path(&vm, server, "srv");
    let chid = value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PUBLIC, PATH_ADDR, 3, 64, 0]));
    write_path(&vm, client, "srv");
    let ret = call(&table, &kernel, tc, SYS_CONNECTION_OPEN, &[PATH_ADDR, 3, 0, 0, TIMEOUT_INFINITE]);
    assert_eq!(ret, SyscallReturn::Blocked);

    let ret = call(&table, &kernel, ts, SYS_CHANNEL_WAIT_CONNECTION, &[chid as usize, 0, 0]);
    assert_eq!(value(ret), KernError::IllegalArgs.code());
    let stats = kernel.channel_stats(server, ChannelId(chid as u32)).unwrap();
    assert_eq!(stats.pending_requests, 1);
    assert_eq!(stats.negotiating, 0);

    let ret = call(&table, &kernel, ts, SYS_CHANNEL_WAIT_CONNECTION, &[chid as usize, INFO_ADDR, 0]);
    assert_eq!(value(ret), 0);
    let info = vm.read_words(server, INFO_ADDR, CONN_INFO_WORDS);
    assert_eq!(info[0], u64::from(client.0));
    assert_eq!(info[1], u64::from(tc.0));
}

#[test]
fn copy_out_is_recorded_while_parked_and_dropped_on_exit() {
    let (kernel, vm) = kernel();
    let table = SyscallTable::new();
    let (server, ts) = spawn(&kernel);
    let tw = kernel.thread_create_default(server).unwrap();

    write_path(&vm, server, "srv");
    let chid = value(call(&table, &kernel, ts, SYS_CHANNEL_OPEN, &[KIND_PUBLIC, PATH_ADDR, 3, 64, 1]));

    let ret = call(&table, &kernel, ts, SYS_RECEIVE, &[chid as usize, MSG_ADDR, TIMEOUT_INFINITE]);
    assert_eq!(ret, SyscallReturn::Blocked);
    assert_eq!(table.pending_copy_outs(), 1);

    // An exited thread never resumes; its entry goes with the next blocking call
    kernel.thread_exit(ts).unwrap();
    assert_eq!(table.resume(&kernel, ts), None);
    let ret = call(&table, &kernel, tw, SYS_RECEIVE, &[chid as usize, MSG_ADDR, 100]);
    assert_eq!(ret, SyscallReturn::Blocked);
    assert_eq!(table.pending_copy_outs(), 1);

    kernel.advance_clock(100);
    assert_eq!(table.resume(&kernel, tw), Some(KernError::Timeout.code()));
    assert_eq!(table.pending_copy_outs(), 0);
}
