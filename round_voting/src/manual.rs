/*!

This is the long-form manual for `round_voting` and `livevote`.

## Rounds

A round groups one or more roles voted at the same time. Each role has a fixed
list of contestants, a maximum number of selections per ballot (`maxVotes`), a
number of seats (`numWinners`) and a number of white votes (`numWhiteVotes`).

A round goes through the following states:

| state    | meaning                                               |
|----------|-------------------------------------------------------|
| `draft`  | created, never activated. It can still be edited.     |
| `active` | activated at least once. It accepts ballots.          |
| `locked` | frozen. Ballots are refused and results are final.    |

Locking never deletes anything. Unlocking a round deletes all of its ballots:
the round has to be voted again from the start.

A round that has been activated or that holds ballots cannot be edited anymore.

## White votes

A white vote is a "no confidence" entry on the ballot. A role with a single
contestant must have at least one. All the white votes of a role are counted
together in the results, under the label `White vote`. When the white vote wins
a seat, that seat stays empty.

## Threshold

The number of votes needed to win depends on the number of real contestants of
the role (white votes are not counted):

* one or two contestants: 66% of the participants, rounded up
* three contestants or more: half of the participants plus one

The threshold is never less than one vote.

The participants are, depending on the `participantCount` setting:

* `presentMembers` (default): the members marked present among those allowed
  to vote in the round
* `votedMembers`: the members who cast a ballot in the round

For example, with 2 contestants and 10 participants, 7 votes are needed.
With 3 contestants and 11 participants, 6 votes are needed.

## Ties

When the last seat is shared by several entries with the same number of votes,
none of them is declared elected. They are all reported as `tied` and the
election manager settles the tie.

## Stands

Members vote on stands. The election manager loads a member on a stand. The
assignment is broadcast to all the stands, and only the matching one shows the
ballot. Once the ballot is recorded, the stand is released.

When the active round changes, is locked, or voting stops, every ballot in
progress is aborted and the stands are unloaded. A round only accepts ballots
once it has been activated.

A stand that loses its connection is probed with a bounded backoff. The probes
stop as soon as the stand connects again.

## `livevote` inputs

### `snapshot`

An export of one round with its recorded ballots:

```json
{
  "settings": { "participantCount": "votedMembers" },
  "round": { "id": 1, "name": "Board", "roles": [ ... ] },
  "members": [ ... ],
  "votes": [ ... ],
  "votingStatuses": [ ... ]
}
```

### `replay`

A scripted session played through the whole system: rounds are created and
activated, members are loaded on stands and vote, then the rounds are locked.

```json
{
  "members": [ ... ],
  "rounds": [
    {
      "name": "Board",
      "roles": [ { "role": "President", "candidates": [1, 2], "numWhiteVotes": 1 } ],
      "ballots": [ { "member": 3, "stand": 1, "votes": { "President": [ { "kind": "member", "id": 1 } ] } } ],
      "lock": true
    }
  ]
}
```

*/
